//! 在页面中执行的脚本，调用方式为 `(脚本)(参数 JSON)`

/// 按文本点击元素: { selector, text } -> bool
pub const CLICK_BY_TEXT_JS: &str = r#"
        ({ selector, text }) => {
            const wanted = text.toLowerCase();
            const el = Array.from(document.querySelectorAll(selector))
                .find(e => (e.textContent || '').trim().toLowerCase().includes(wanted));
            if (!el) {
                return false;
            }
            el.click();
            return true;
        }
    "#;

/// 在新建 caderno 表单中选择领域: areaName -> bool
pub const SELECT_AREA_JS: &str = r#"
        (areaName) => {
            const direct = document.querySelector(`[data-area="${areaName}"]`);
            if (direct) {
                direct.click();
                return true;
            }
            const candidates = document.querySelectorAll(
                'label, .area-filter, .area-item, .filter-area, .accordion-item'
            );
            for (const el of candidates) {
                if ((el.textContent || '').includes(areaName)) {
                    el.click();
                    return true;
                }
            }
            return false;
        }
    "#;

/// 读取学科及其题量文本: () -> [{ name, count }]
pub const LIST_SUBJECTS_JS: &str = r#"
        () => {
            const rows = document.querySelectorAll('.materia-item, .subject-row, tr[data-materia]');
            const out = [];
            rows.forEach(row => {
                const nameEl = row.querySelector('.materia-nome, .subject-name, td:first-child');
                const qtyEl = row.querySelector('.materia-qtd, .subject-count, input[type="number"]');
                const name = nameEl ? nameEl.textContent.trim() : '';
                let raw = '0';
                if (qtyEl) {
                    raw = qtyEl instanceof HTMLInputElement
                        ? (qtyEl.max || qtyEl.value)
                        : qtyEl.textContent;
                }
                if (name) {
                    out.push({ name, count: String(raw) });
                }
            });
            return out;
        }
    "#;

/// 设置某学科的题量: { subject, quantity } -> bool
pub const SET_SUBJECT_QUANTITY_JS: &str = r#"
        ({ subject, quantity }) => {
            let input = document.querySelector(`input[data-materia="${subject}"]`);
            if (!input) {
                const row = Array.from(document.querySelectorAll('.materia-item, .subject-row, tr'))
                    .find(r => (r.textContent || '').includes(subject));
                input = row ? row.querySelector('input[type="number"], input') : null;
            }
            if (!input) {
                return false;
            }
            const setter = Object.getOwnPropertyDescriptor(HTMLInputElement.prototype, 'value').set;
            setter.call(input, String(quantity));
            input.dispatchEvent(new Event('input', { bubbles: true }));
            input.dispatchEvent(new Event('change', { bubbles: true }));
            return true;
        }
    "#;

/// 勾选排除过时和作废题目: () -> number (勾选数量)
pub const EXCLUDE_OUTDATED_JS: &str = r#"
        () => {
            const selectors = [
                'input[name="remover_desatualizadas"], #remover-desatualizadas',
                'input[name="remover_anuladas"], #remover-anuladas',
            ];
            let checked = 0;
            for (const sel of selectors) {
                const box = document.querySelector(sel);
                if (box && !box.checked) {
                    box.click();
                }
                if (box) {
                    checked += 1;
                }
            }
            return checked;
        }
    "#;

/// 填写名称并保存 caderno: { name } -> bool
pub const SAVE_NOTEBOOK_JS: &str = r#"
        ({ name }) => {
            const input = document.querySelector(
                'input[name="nome_caderno"], #nome-caderno, input[placeholder*="nome"]'
            );
            if (input && name) {
                input.value = name;
                input.dispatchEvent(new Event('input', { bubbles: true }));
            }
            const button = Array.from(document.querySelectorAll('button, input[type="submit"]'))
                .find(b => /salvar|criar/i.test(b.textContent || b.value || ''));
            if (!button) {
                return false;
            }
            button.click();
            return true;
        }
    "#;

/// 当前页所有题目的 HTML: () -> { fragments: [string], hasNext: bool }
pub const QUESTION_FRAGMENTS_JS: &str = r#"
        () => {
            const selector = '.questao, .question-item, [data-questao-id]';
            const all = Array.from(document.querySelectorAll(selector));
            const top = all.filter(el => !el.parentElement || !el.parentElement.closest(selector));
            const next = document.querySelector(
                '.pagination .next:not(.disabled), a[rel="next"], .btn-next-page'
            );
            return {
                fragments: top.map(el => el.outerHTML),
                hasNext: !!next
            };
        }
    "#;

/// 点击下一页: () -> bool
pub const NEXT_PAGE_JS: &str = r#"
        () => {
            const next = document.querySelector(
                '.pagination .next:not(.disabled), a[rel="next"], .btn-next-page'
            );
            if (!next) {
                return false;
            }
            next.click();
            return true;
        }
    "#;

/// 登录页上的错误提示: () -> string | null
pub const LOGIN_ERROR_JS: &str = r#"
        () => {
            const el = document.querySelector('.alert-danger, .error-message, .login-error');
            return el ? el.textContent.trim() : null;
        }
    "#;
