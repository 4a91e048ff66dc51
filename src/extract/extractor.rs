use anyhow::{Result, anyhow};
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use std::fmt;

use crate::core::ScraperError;
use crate::core::models::{Alternative, Area, ExtractedQuestion, QuestionShape};
use crate::utils::text::{collapse_whitespace, fold_diacritics};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionErrorKind {
    /// 页面没有内容
    Empty,
    /// 标记损坏或模板未渲染
    Corrupted,
    /// 结构正常但缺少必需字段
    Incomplete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionError {
    pub kind: ExtractionErrorKind,
    pub detail: String,
}

impl fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)
    }
}

impl From<ExtractionError> for ScraperError {
    fn from(err: ExtractionError) -> Self {
        match err.kind {
            ExtractionErrorKind::Empty => ScraperError::ExtractionEmpty,
            ExtractionErrorKind::Corrupted => ScraperError::ExtractionCorrupted(err.detail),
            ExtractionErrorKind::Incomplete => ScraperError::ExtractionIncomplete(err.detail),
        }
    }
}

/// 单道题的提取结果
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Extraction {
    pub success: bool,
    pub source_id: Option<String>,
    pub materia: Option<String>,
    pub assunto: Option<String>,
    pub concurso: Option<String>,
    pub banca: Option<String>,
    pub orgao: Option<String>,
    pub cargo: Option<String>,
    pub prova: Option<String>,
    pub ano: Option<i32>,
    pub enunciado: Option<String>,
    pub alternativas: Option<Vec<Alternative>>,
    pub imagens: Option<Vec<String>>,
    pub imagens_comentario: Vec<String>,
    pub gabarito: Option<String>,
    pub comentario: Option<String>,
    pub shape: Option<QuestionShape>,
    pub confidence: f32,
    pub error: Option<ExtractionError>,
}

impl Extraction {
    fn failed(kind: ExtractionErrorKind, detail: impl Into<String>) -> Self {
        Self {
            success: false,
            confidence: 0.0,
            error: Some(ExtractionError {
                kind,
                detail: detail.into(),
            }),
            ..Default::default()
        }
    }

    /// 转为可持久化的题目
    pub fn into_question(self, area: Area) -> Result<ExtractedQuestion, ScraperError> {
        if let Some(err) = self.error {
            return Err(err.into());
        }
        let missing = |field: &str| ScraperError::ExtractionIncomplete(format!("缺少 {}", field));
        Ok(ExtractedQuestion {
            source_id: self.source_id.ok_or_else(|| missing("id"))?,
            area,
            materia: self.materia,
            assunto: self.assunto,
            concurso: self.concurso,
            banca: self.banca,
            orgao: self.orgao,
            cargo: self.cargo,
            prova: self.prova,
            ano: self.ano,
            enunciado: self.enunciado.ok_or_else(|| missing("enunciado"))?,
            alternativas: self.alternativas.ok_or_else(|| missing("alternativas"))?,
            gabarito: self.gabarito,
            comentario: self.comentario,
            imagens: self.imagens.unwrap_or_default(),
            imagens_comentario: self.imagens_comentario,
            shape: self.shape.unwrap_or(QuestionShape::MultipleChoice),
            extraction_confidence: self.confidence,
        })
    }
}

struct Selectors {
    id_link: Selector,
    id_attr: Selector,
    source_link: Selector,
    materia: Selector,
    assunto: Selector,
    concurso: Selector,
    banca: Selector,
    orgao: Selector,
    cargo: Selector,
    prova: Selector,
    ano: Selector,
    statement: Selector,
    alternatives: Selector,
    alternative_letter: Selector,
    alternative_text: Selector,
    correct_alternative: Selector,
    wrong_answer_banner: Selector,
    comment: Selector,
    image: Selector,
    any: Selector,
}

fn sel(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("选择器无效 {}: {:?}", css, e))
}

impl Selectors {
    fn new() -> Result<Self> {
        Ok(Self {
            id_link: sel("a.id-questao")?,
            id_attr: sel("[data-questao-id]")?,
            source_link: sel("div.questao-enunciado-concurso a[target='_blank']")?,
            materia: sel("div.questao-cabecalho-informacoes-materia a")?,
            assunto: sel("div.questao-cabecalho-informacoes-assunto")?,
            concurso: sel("div.questao-enunciado-concurso")?,
            banca: sel(".questao-cabecalho-informacoes-banca, .banca")?,
            orgao: sel(".questao-cabecalho-informacoes-orgao, .orgao")?,
            cargo: sel(".questao-cabecalho-informacoes-cargo, .cargo")?,
            prova: sel(".questao-cabecalho-informacoes-prova, .prova")?,
            ano: sel(".questao-cabecalho-informacoes-ano, .ano, [data-ano]")?,
            statement: sel("div.questao-enunciado-texto")?,
            alternatives: sel("ul.questao-enunciado-alternativas li")?,
            alternative_letter: sel("span.questao-enunciado-alternativa-opcao label")?,
            alternative_text: sel("div.questao-enunciado-alternativa-texto")?,
            correct_alternative: sel("li.questao-enunciado-alternativa-correta")?,
            wrong_answer_banner: sel("div.questao-enunciado-resolucao-errou strong")?,
            comment: sel("div.questao-complementos-comentario-conteudo-texto")?,
            image: sel("img")?,
            any: sel("*")?,
        })
    }
}

const IMAGE_ATTRS: [&str; 4] = ["src", "data-src", "data-original", "data-lazy-src"];

/// 题目提取器，选择器和正则只编译一次
///
/// 输入是一道题的 HTML 片段，输出只取决于输入。
pub struct QuestionExtractor {
    sel: Selectors,
    template: Regex,
    gabarito_in_comment: Regex,
    digits_in_href: Regex,
    year: Regex,
}

impl QuestionExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            sel: Selectors::new()?,
            template: Regex::new(r"\{\{[^{}]*\}\}")?,
            gabarito_in_comment: Regex::new(
                r"(?i)gabarito\s*:?\s*(?:letra\s*)?\b([A-E]|certo|errado)\b",
            )?,
            digits_in_href: Regex::new(r"/questoes/(\d+)")?,
            year: Regex::new(r"\b(?:19|20)\d{2}\b")?,
        })
    }

    pub fn extract(&self, page_content: &str) -> Extraction {
        let doc = Html::parse_fragment(page_content);
        let text = visible_text(doc.root_element());
        let without_templates = collapse_whitespace(&self.template.replace_all(&text, " "));

        if without_templates.is_empty() {
            if text.is_empty() && !self.has_directive_attributes(&doc) {
                return Extraction::failed(ExtractionErrorKind::Empty, "页面没有可见文本");
            }
            return Extraction::failed(ExtractionErrorKind::Corrupted, "只有未渲染的模板指令");
        }

        let statement = doc.select(&self.sel.statement).next();
        let items: Vec<ElementRef> = doc.select(&self.sel.alternatives).collect();
        if statement.is_none() && items.is_empty() {
            return Extraction::failed(ExtractionErrorKind::Corrupted, "无法识别题目结构");
        }

        let enunciado = statement.map(element_text).unwrap_or_default();
        if self.template.is_match(&enunciado) {
            return Extraction::failed(ExtractionErrorKind::Corrupted, "题干包含未渲染的模板");
        }

        let alternativas = self.alternatives(&items);
        if alternativas.iter().any(|a| self.template.is_match(&a.text)) {
            return Extraction::failed(ExtractionErrorKind::Corrupted, "选项包含未渲染的模板");
        }

        if enunciado.is_empty() {
            return Extraction::failed(ExtractionErrorKind::Incomplete, "缺少题干");
        }
        let Some(source_id) = self.source_id(&doc) else {
            return Extraction::failed(ExtractionErrorKind::Incomplete, "缺少题目编号");
        };
        if alternativas.len() < 2 {
            return Extraction::failed(
                ExtractionErrorKind::Incomplete,
                format!("只有 {} 个选项", alternativas.len()),
            );
        }

        let shape = classify_shape(&alternativas);
        let comment_el = doc.select(&self.sel.comment).next();
        let comentario = comment_el.map(element_text).filter(|c| !c.is_empty());
        let gabarito = self.gabarito(&doc, comentario.as_deref());

        let mut imagens = Vec::new();
        if let Some(el) = statement {
            self.collect_images(el, &mut imagens);
        }
        for item in &items {
            self.collect_images(*item, &mut imagens);
        }
        let mut imagens_comentario = Vec::new();
        if let Some(el) = comment_el {
            self.collect_images(el, &mut imagens_comentario);
        }

        let confidence = confidence(
            &enunciado,
            &alternativas,
            shape,
            gabarito.as_deref(),
            comentario.is_some(),
        );

        let concurso = first_text(&doc, &self.sel.concurso);
        let ano = self.year(&doc, concurso.as_deref());

        Extraction {
            success: true,
            source_id: Some(source_id),
            materia: first_text(&doc, &self.sel.materia),
            assunto: first_text(&doc, &self.sel.assunto).map(|a| {
                collapse_whitespace(a.trim_start_matches("Assunto:").trim_start_matches("Assunto"))
            }),
            banca: header_field(&doc, &self.sel.banca, "banca"),
            orgao: header_field(&doc, &self.sel.orgao, "orgao"),
            cargo: header_field(&doc, &self.sel.cargo, "cargo"),
            prova: header_field(&doc, &self.sel.prova, "prova"),
            ano,
            concurso,
            enunciado: Some(enunciado),
            alternativas: Some(alternativas),
            imagens: Some(imagens),
            imagens_comentario,
            gabarito,
            comentario,
            shape: Some(shape),
            confidence,
            error: None,
        }
    }

    fn has_directive_attributes(&self, doc: &Html) -> bool {
        doc.select(&self.sel.any).any(|el| {
            el.value().attrs().any(|(name, _)| {
                name.starts_with("ng-") || name.starts_with("data-ng-") || name.starts_with("v-")
            })
        })
    }

    /// 年份来自 data-ano、年份字段中的数字，最后才看考试名称里的四位年份
    fn year(&self, doc: &Html, concurso: Option<&str>) -> Option<i32> {
        let from_header = doc.select(&self.sel.ano).next().and_then(|el| {
            let raw = el
                .value()
                .attr("data-ano")
                .map(str::to_string)
                .unwrap_or_else(|| element_text(el));
            raw.chars()
                .filter(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse::<i32>()
                .ok()
        });
        from_header.or_else(|| {
            concurso
                .and_then(|c| self.year.find_iter(c).last())
                .and_then(|m| m.as_str().parse().ok())
        })
    }

    fn source_id(&self, doc: &Html) -> Option<String> {
        let from_link = doc.select(&self.sel.id_link).next().map(element_text);
        let from_attr = || {
            doc.select(&self.sel.id_attr)
                .next()
                .and_then(|el| el.value().attr("data-questao-id"))
                .map(str::to_string)
        };
        let from_source = || {
            doc.select(&self.sel.source_link)
                .next()
                .and_then(|el| el.value().attr("href"))
                .and_then(|href| self.digits_in_href.captures(href))
                .map(|caps| caps[1].to_string())
        };

        from_link
            .or_else(from_attr)
            .or_else(from_source)
            .map(|raw| raw.chars().filter(|c| c.is_ascii_digit()).collect::<String>())
            .filter(|id| !id.is_empty())
    }

    fn alternatives(&self, items: &[ElementRef]) -> Vec<Alternative> {
        let mut out = Vec::new();
        for (idx, item) in items.iter().enumerate() {
            let letter = item
                .select(&self.sel.alternative_letter)
                .next()
                .map(element_text)
                .map(|l| l.trim_end_matches([')', '.']).trim().to_uppercase())
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| positional_letter(idx));
            let text = item
                .select(&self.sel.alternative_text)
                .next()
                .map(element_text)
                .unwrap_or_else(|| element_text(*item));
            if text.is_empty() {
                continue;
            }
            out.push(Alternative { letter, text });
        }
        out
    }

    /// 答案的来源依次是：答错提示、标记为正确的选项、解析中的 "Gabarito: X"
    fn gabarito(&self, doc: &Html, comentario: Option<&str>) -> Option<String> {
        if let Some(answer) = doc
            .select(&self.sel.wrong_answer_banner)
            .next()
            .map(element_text)
            .and_then(|raw| normalize_answer(&raw))
        {
            return Some(answer);
        }

        if let Some(answer) = doc
            .select(&self.sel.correct_alternative)
            .next()
            .and_then(|li| li.select(&self.sel.alternative_letter).next())
            .map(element_text)
            .and_then(|raw| normalize_answer(&raw))
        {
            return Some(answer);
        }

        comentario
            .and_then(|c| self.gabarito_in_comment.captures(c))
            .and_then(|caps| normalize_answer(&caps[1]))
    }

    fn collect_images(&self, root: ElementRef, out: &mut Vec<String>) {
        for img in root.select(&self.sel.image) {
            let url = IMAGE_ATTRS
                .iter()
                .filter_map(|attr| img.value().attr(attr))
                .map(str::trim)
                .find(|u| u.starts_with("http://") || u.starts_with("https://"));
            if let Some(url) = url {
                if !out.iter().any(|u| u == url) {
                    out.push(url.to_string());
                }
            }
        }
    }
}

/// 恰好两个选项且文本为 certo / errado 时是判断题
pub fn classify_shape(alternativas: &[Alternative]) -> QuestionShape {
    if alternativas.len() != 2 {
        return QuestionShape::MultipleChoice;
    }
    let mut texts: Vec<String> = alternativas
        .iter()
        .map(|a| fold_diacritics(a.text.trim()))
        .collect();
    texts.sort();
    if texts == ["certo", "errado"] {
        QuestionShape::Binary
    } else {
        QuestionShape::MultipleChoice
    }
}

/// "Letra b" -> "B"，"CERTO" -> "C"，"Errado" -> "E"
pub fn normalize_answer(raw: &str) -> Option<String> {
    let folded = fold_diacritics(&collapse_whitespace(raw));
    let folded = folded.trim_start_matches("letra").trim().trim_end_matches(['.', ')']);
    match folded {
        "certo" | "c" => Some("C".to_string()),
        "errado" | "e" => Some("E".to_string()),
        "a" | "b" | "d" => Some(folded.to_uppercase()),
        _ => None,
    }
}

fn confidence(
    enunciado: &str,
    alternativas: &[Alternative],
    shape: QuestionShape,
    gabarito: Option<&str>,
    has_comment: bool,
) -> f32 {
    let mut score = 1.0f32;
    match gabarito {
        None => score -= 0.3,
        Some(g) => {
            let matches = match shape {
                QuestionShape::Binary => g == "C" || g == "E",
                QuestionShape::MultipleChoice => alternativas.iter().any(|a| a.letter == g),
            };
            if !matches {
                score -= 0.2;
            }
        }
    }
    if !has_comment {
        score -= 0.1;
    }
    if enunciado.chars().count() < 20 {
        score -= 0.2;
    }
    if shape == QuestionShape::MultipleChoice && !(4..=5).contains(&alternativas.len()) {
        score -= 0.1;
    }
    (score.max(0.0) * 100.0).round() / 100.0
}

fn positional_letter(idx: usize) -> String {
    char::from(b'A' + (idx % 26) as u8).to_string()
}

fn first_text(doc: &Html, selector: &Selector) -> Option<String> {
    doc.select(selector)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
}

/// 题头字段，去掉 "Banca:" 之类的标签
fn header_field(doc: &Html, selector: &Selector, label: &str) -> Option<String> {
    first_text(doc, selector)
        .map(|text| match text.split_once(':') {
            Some((head, rest)) if fold_diacritics(head.trim()) == label => collapse_whitespace(rest),
            _ => text,
        })
        .filter(|t| !t.is_empty())
}

fn element_text(el: ElementRef) -> String {
    collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

/// 所有可见文本节点，不含 script / style
fn visible_text(root: ElementRef) -> String {
    let mut out = String::new();
    for node in root.descendants() {
        if let Node::Text(text) = node.value() {
            let hidden = node
                .parent()
                .and_then(ElementRef::wrap)
                .map(|p| matches!(p.value().name(), "script" | "style" | "noscript"))
                .unwrap_or(false);
            if !hidden {
                out.push_str(&text.text);
                out.push(' ');
            }
        }
    }
    collapse_whitespace(&out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTIPLE_CHOICE: &str = r#"
        <article class="questao">
          <div class="questao-cabecalho-informacoes-materia"><a>Direito Constitucional</a></div>
          <div class="questao-cabecalho-informacoes-assunto">Assunto: Direitos Fundamentais</div>
          <div class="questao-cabecalho-informacoes-banca">Banca: CEBRASPE</div>
          <div class="questao-cabecalho-informacoes-orgao">Órgão: PF</div>
          <div class="questao-cabecalho-informacoes-cargo">Cargo: Agente de Polícia Federal</div>
          <div class="questao-cabecalho-informacoes-prova">Prova Objetiva</div>
          <div class="questao-enunciado-concurso">
            <a class="id-questao">#123456</a> CEBRASPE - PF - 2021
          </div>
          <div class="questao-enunciado-texto">
            <p>Qual dos direitos abaixo é considerado fundamental pela Constituição?</p>
            <img src="https://cdn.example.com/a.png">
            <img data-src="https://cdn.example.com/a.png">
            <img src="/relative.png">
          </div>
          <ul class="questao-enunciado-alternativas">
            <li><span class="questao-enunciado-alternativa-opcao"><label>A)</label></span>
                <div class="questao-enunciado-alternativa-texto">Vida</div></li>
            <li class="questao-enunciado-alternativa-correta"><span class="questao-enunciado-alternativa-opcao"><label>B)</label></span>
                <div class="questao-enunciado-alternativa-texto">Liberdade</div></li>
            <li><span class="questao-enunciado-alternativa-opcao"><label>C)</label></span>
                <div class="questao-enunciado-alternativa-texto">Igualdade</div></li>
            <li><span class="questao-enunciado-alternativa-opcao"><label>D)</label></span>
                <div class="questao-enunciado-alternativa-texto">Segurança</div></li>
          </ul>
          <div class="questao-complementos-comentario-conteudo-texto">
            Comentário do professor. <img data-lazy-src="https://cdn.example.com/c.png">
          </div>
        </article>"#;

    const BINARY: &str = r#"
        <div data-questao-id="987">
          <div class="questao-enunciado-texto">A União pode legislar sobre direito penal.</div>
          <ul class="questao-enunciado-alternativas">
            <li><div class="questao-enunciado-alternativa-texto">Certo</div></li>
            <li><div class="questao-enunciado-alternativa-texto">ERRADO</div></li>
          </ul>
          <div class="questao-complementos-comentario-conteudo-texto">Gabarito: CERTO</div>
        </div>"#;

    fn extractor() -> QuestionExtractor {
        QuestionExtractor::new().unwrap()
    }

    #[test]
    fn extracts_multiple_choice_question() {
        let e = extractor().extract(MULTIPLE_CHOICE);
        assert!(e.success, "{:?}", e.error);
        assert_eq!(e.source_id.as_deref(), Some("123456"));
        assert_eq!(e.materia.as_deref(), Some("Direito Constitucional"));
        assert_eq!(e.assunto.as_deref(), Some("Direitos Fundamentais"));
        assert_eq!(e.banca.as_deref(), Some("CEBRASPE"));
        assert_eq!(e.orgao.as_deref(), Some("PF"));
        assert_eq!(e.cargo.as_deref(), Some("Agente de Polícia Federal"));
        assert_eq!(e.prova.as_deref(), Some("Prova Objetiva"));
        assert_eq!(e.ano, Some(2021));
        assert_eq!(e.shape, Some(QuestionShape::MultipleChoice));
        let alts = e.alternativas.clone().unwrap();
        assert_eq!(alts.len(), 4);
        assert_eq!(alts[0].letter, "A");
        assert_eq!(alts[3].text, "Segurança");
        assert_eq!(e.gabarito.as_deref(), Some("B"));
        assert_eq!(e.imagens.clone().unwrap(), vec!["https://cdn.example.com/a.png"]);
        assert_eq!(e.imagens_comentario, vec!["https://cdn.example.com/c.png"]);
        assert_eq!(e.confidence, 1.0);
    }

    #[test]
    fn binary_question_maps_answer_to_letter() {
        let e = extractor().extract(BINARY);
        assert!(e.success);
        assert_eq!(e.shape, Some(QuestionShape::Binary));
        assert_eq!(e.source_id.as_deref(), Some("987"));
        assert_eq!(e.gabarito.as_deref(), Some("C"));
        let alts = e.alternativas.unwrap();
        assert_eq!(alts[0].letter, "A");
        assert_eq!(alts[1].letter, "B");
        assert!(e.banca.is_none());
        assert!(e.ano.is_none());
    }

    #[test]
    fn year_field_wins_over_contest_line() {
        let html = MULTIPLE_CHOICE.replace(
            r#"<div class="questao-cabecalho-informacoes-banca">"#,
            r#"<span class="ano">Ano: 2019</span><div class="questao-cabecalho-informacoes-banca">"#,
        );
        let e = extractor().extract(&html);
        assert_eq!(e.ano, Some(2019));
        let q = e.into_question(Area::Policial).unwrap();
        assert_eq!(q.ano, Some(2019));
        assert_eq!(q.banca.as_deref(), Some("CEBRASPE"));
    }

    #[test]
    fn extraction_is_deterministic() {
        let ex = extractor();
        assert_eq!(ex.extract(MULTIPLE_CHOICE), ex.extract(MULTIPLE_CHOICE));
        assert_eq!(ex.extract(BINARY), ex.extract(BINARY));
    }

    #[test]
    fn template_only_markup_is_corrupted() {
        let html = r#"<div class="questao-enunciado-texto">{{ questao.enunciado }}</div>
                      <ul class="questao-enunciado-alternativas"><li>{{ alt.texto }}</li></ul>"#;
        let e = extractor().extract(html);
        assert!(!e.success);
        assert_eq!(e.error.unwrap().kind, ExtractionErrorKind::Corrupted);
        assert!(e.enunciado.is_none());

        let directives = r#"<div ng-bind-html="questao.enunciado"></div>"#;
        let e = extractor().extract(directives);
        assert_eq!(e.error.unwrap().kind, ExtractionErrorKind::Corrupted);
    }

    #[test]
    fn blank_page_is_empty() {
        let e = extractor().extract("<div>   </div>");
        assert_eq!(e.error.unwrap().kind, ExtractionErrorKind::Empty);
        assert_eq!(e.confidence, 0.0);
    }

    #[test]
    fn missing_fields_are_incomplete() {
        let no_id = r#"<div class="questao-enunciado-texto">Enunciado sem identificador algum.</div>
            <ul class="questao-enunciado-alternativas"><li>Certo</li><li>Errado</li></ul>"#;
        let e = extractor().extract(no_id);
        assert_eq!(e.error.unwrap().kind, ExtractionErrorKind::Incomplete);

        let one_alt = r#"<a class="id-questao">#1</a>
            <div class="questao-enunciado-texto">Enunciado com uma única alternativa.</div>
            <ul class="questao-enunciado-alternativas"><li>Somente</li></ul>"#;
        let e = extractor().extract(one_alt);
        let err = e.error.unwrap();
        assert_eq!(err.kind, ExtractionErrorKind::Incomplete);
        assert!(matches!(
            ScraperError::from(err),
            ScraperError::ExtractionIncomplete(_)
        ));
    }

    #[test]
    fn unrecognised_markup_is_corrupted() {
        let e = extractor().extract("<p>Manutenção programada</p>");
        assert_eq!(e.error.unwrap().kind, ExtractionErrorKind::Corrupted);
    }

    #[test]
    fn classifies_shape_ignoring_case_and_accents() {
        let alt = |t: &str| Alternative { letter: "A".into(), text: t.into() };
        assert_eq!(classify_shape(&[alt("ERRADO"), alt(" certo ")]), QuestionShape::Binary);
        assert_eq!(classify_shape(&[alt("Certo"), alt("Certo")]), QuestionShape::MultipleChoice);
        assert_eq!(
            classify_shape(&[alt("Certo"), alt("Errado"), alt("Talvez")]),
            QuestionShape::MultipleChoice
        );
    }

    #[test]
    fn normalizes_answer_forms() {
        assert_eq!(normalize_answer("Letra b"), Some("B".into()));
        assert_eq!(normalize_answer("CERTO"), Some("C".into()));
        assert_eq!(normalize_answer("Errado."), Some("E".into()));
        assert_eq!(normalize_answer("talvez"), None);
    }

    #[test]
    fn missing_answer_lowers_confidence() {
        let html = MULTIPLE_CHOICE.replace("questao-enunciado-alternativa-correta", "");
        let e = extractor().extract(&html);
        assert!(e.success);
        assert!(e.gabarito.is_none());
        assert_eq!(e.confidence, 0.7);
    }

    #[test]
    fn converts_into_question() {
        let q = extractor().extract(BINARY).into_question(Area::Policial).unwrap();
        assert_eq!(q.source_id, "987");
        assert_eq!(q.area, Area::Policial);
        assert_eq!(q.shape, QuestionShape::Binary);
    }
}
