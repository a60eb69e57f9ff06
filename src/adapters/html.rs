use crate::adapters::http::fetch_text;
use crate::config::toml_config::ExtractorConfig;
use crate::domain::model::Language;
use crate::domain::ports::{ContentExtractor, ExtractedContent};
use crate::utils::error::{HarvestError, Result};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashMap, HashSet};

const DEFAULT_TITLE_SELECTOR: &str = "h1";
const DEFAULT_BODY_SELECTOR: &str = "body";
const DEFAULT_STRIP_SELECTORS: &str = "script, style, nav, header, footer";

/// 區塊元素前後斷行；行內元素（b、i、span...）直接相連，不可插入空白
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption", "h1", "h2", "h3",
    "h4", "h5", "h6", "hr", "li", "ol", "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

/// HTML 片段轉純文字：解碼實體、合併空白
pub fn normalize_text(input: &str) -> String {
    let text = if input.contains('<') {
        let fragment = Html::parse_fragment(input);
        let mut out = String::new();
        collect_text(fragment.root_element(), &|_| false, &mut out);
        out
    } else {
        input.to_string()
    };
    let decoded = html_escape::decode_html_entities(&text);
    collapse_whitespace(&decoded)
}

/// 依文件順序串接文字節點，略過 skip 內的子樹
fn collect_text<F: Fn(ElementRef<'_>) -> bool>(element: ElementRef<'_>, skip: &F, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child) = ElementRef::wrap(child) {
            if skip(child) {
                continue;
            }
            let block = BLOCK_ELEMENTS.contains(&child.value().name());
            if block {
                out.push('\n');
            }
            collect_text(child, skip, out);
            if block {
                out.push('\n');
            }
        }
    }
}

fn element_plain_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    collect_text(element, &|_| false, &mut out);
    collapse_whitespace(&out)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_selector(field: &str, selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| HarvestError::InvalidConfigValueError {
        field: field.to_string(),
        value: selector.to_string(),
        reason: format!("invalid CSS selector: {}", e),
    })
}

/// 依 CSS selector 抽取標題與內文的頁面 extractor
pub struct HtmlContentExtractor {
    client: Client,
    name: String,
    title_selector: Selector,
    body_selector: Selector,
    strip_selectors: Vec<Selector>,
}

impl HtmlContentExtractor {
    pub fn new(client: Client, name: impl Into<String>, config: &ExtractorConfig) -> Result<Self> {
        let strip_selectors = match &config.strip_selectors {
            Some(list) => list
                .iter()
                .map(|s| parse_selector("extractor.strip_selectors", s))
                .collect::<Result<Vec<_>>>()?,
            None => vec![parse_selector("extractor.strip_selectors", DEFAULT_STRIP_SELECTORS)?],
        };

        Ok(Self {
            client,
            name: name.into(),
            title_selector: parse_selector(
                "extractor.title_selector",
                config.title_selector.as_deref().unwrap_or(DEFAULT_TITLE_SELECTOR),
            )?,
            body_selector: parse_selector("extractor.body_selector", &config.body_selector)?,
            strip_selectors,
        })
    }

    /// 未設定 extractor 的 feed group 使用的通用版本
    pub fn generic(client: Client, name: impl Into<String>) -> Result<Self> {
        let config = ExtractorConfig {
            title_selector: None,
            body_selector: DEFAULT_BODY_SELECTOR.to_string(),
            strip_selectors: None,
        };
        Self::new(client, name, &config)
    }

    pub fn extract(&self, html: &str) -> ExtractedContent {
        let document = Html::parse_document(html);

        let title = document
            .select(&self.title_selector)
            .next()
            .map(element_plain_text)
            .filter(|t| !t.is_empty())
            .or_else(|| {
                let title = Selector::parse("title").ok()?;
                document
                    .select(&title)
                    .next()
                    .map(element_plain_text)
            })
            .unwrap_or_default();

        let blocks: Vec<String> = document
            .select(&self.body_selector)
            .map(|element| self.element_text(element))
            .filter(|text| !text.is_empty())
            .collect();

        ExtractedContent {
            title,
            body: blocks.join("\n\n"),
        }
    }

    fn element_text(&self, element: ElementRef<'_>) -> String {
        let stripped: HashSet<_> = self
            .strip_selectors
            .iter()
            .flat_map(|s| element.select(s))
            .map(|e| e.id())
            .collect();

        let mut out = String::new();
        collect_text(element, &|e: ElementRef<'_>| stripped.contains(&e.id()), &mut out);
        collapse_whitespace(&out)
    }
}

#[async_trait]
impl ContentExtractor for HtmlContentExtractor {
    async fn fetch_content(&self, url: &str, language: Language) -> Result<ExtractedContent> {
        let mut headers = HashMap::new();
        headers.insert("Accept-Language".to_string(), language.code().to_string());

        let html = fetch_text(&self.client, &self.name, url, Some(&headers), None).await?;
        let content = self.extract(&html);
        tracing::debug!(
            extractor = %self.name,
            lang = %language,
            "📄 Extracted {} chars from {}",
            content.body.len(),
            url
        );
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::http::build_client;
    use httpmock::prelude::*;
    use std::time::Duration;

    const PAGE: &str = r#"<html>
<head><title>Press Release</title></head>
<body>
  <nav>Home | About</nav>
  <h1> Temporary   road closure </h1>
  <div id="pressrelease">
    <p>The Transport Department announced that Queen's Road will be closed.</p>
    <script>track();</script>
    <p class="share">Share this</p>
    <p>Motorists should use alternative routes.</p>
  </div>
</body>
</html>"#;

    fn extractor() -> HtmlContentExtractor {
        let config = ExtractorConfig {
            title_selector: Some("h1".to_string()),
            body_selector: "#pressrelease".to_string(),
            strip_selectors: Some(vec!["script".to_string(), ".share".to_string()]),
        };
        HtmlContentExtractor::new(build_client(Duration::from_secs(5), "test").unwrap(), "td_press", &config)
            .unwrap()
    }

    #[test]
    fn test_normalize_text_strips_markup_and_entities() {
        assert_eq!(normalize_text("<p>Rain &amp; wind</p>\n  <b>warning</b>"), "Rain & wind warning");
        assert_eq!(normalize_text("Flood &amp;amp; storm"), "Flood &amp; storm");
        assert_eq!(normalize_text("  plain   text "), "plain text");
    }

    #[test]
    fn test_extract_uses_selectors_and_strips_noise() {
        let content = extractor().extract(PAGE);
        assert_eq!(content.title, "Temporary road closure");
        assert_eq!(
            content.body,
            "The Transport Department announced that Queen's Road will be closed. Motorists should use alternative routes."
        );
    }

    #[test]
    fn test_inline_markup_does_not_split_words() {
        let html = "<html><body><h1>封<span>路</span></h1><div id='pressrelease'>\
                    <p>預計<b>有</b>大雨。Re<i>open</i>ed at 5pm.</p><p>Second<br>line</p></div></body></html>";
        let content = extractor().extract(html);
        assert_eq!(content.title, "封路");
        assert_eq!(content.body, "預計有大雨。Reopened at 5pm. Second line");

        assert_eq!(normalize_text("<li>A<b>B</b></li><li>C</li>"), "AB C");
    }

    #[test]
    fn test_missing_body_selector_gives_empty_body() {
        let content = extractor().extract("<html><head><title>Only title</title></head><body></body></html>");
        assert_eq!(content.title, "Only title");
        assert!(content.body.is_empty());
    }

    #[test]
    fn test_invalid_selector_is_config_error() {
        let config = ExtractorConfig {
            title_selector: None,
            body_selector: "div[[".to_string(),
            strip_selectors: None,
        };
        let result = HtmlContentExtractor::new(
            build_client(Duration::from_secs(5), "test").unwrap(),
            "broken",
            &config,
        );
        assert!(matches!(result, Err(HarvestError::InvalidConfigValueError { .. })));
    }

    #[tokio::test]
    async fn test_fetch_content_over_http() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/tc/p1.htm").header("Accept-Language", "zh-Hant");
            then.status(200).body(PAGE);
        });

        let content = extractor()
            .fetch_content(&server.url("/tc/p1.htm"), Language::ZhHant)
            .await
            .unwrap();
        assert!(content.body.starts_with("The Transport Department"));
        mock.assert();
    }
}
