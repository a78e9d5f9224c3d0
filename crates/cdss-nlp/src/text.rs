//! 文本提取
//!
//! 将文档原始字节转换为纯文本。当前实现只处理文本类文档，真实OCR引擎
//! 通过实现 [`TextExtractor`] 接口替换，业务逻辑不区分具体实现。

use async_trait::async_trait;
use cdss_core::{CdssError, Document, Result};

/// 文本提取接口
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// 获取提取器名称
    fn name(&self) -> &str;

    /// 提取文档文本
    async fn extract_text(&self, document: &Document, content: &[u8]) -> Result<String>;
}

/// 纯文本提取器：按UTF-8解码，统一换行符
#[derive(Debug, Default, Clone)]
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    fn name(&self) -> &str {
        "plain_text"
    }

    async fn extract_text(&self, document: &Document, content: &[u8]) -> Result<String> {
        let text = std::str::from_utf8(content).map_err(|_| CdssError::Processing {
            stage: "ocr".to_string(),
            message: format!(
                "文档 {} ({}) 不是文本内容，需要配置OCR引擎",
                document.id, document.file_name
            ),
        })?;

        let text = text.trim_start_matches('\u{feff}').replace("\r\n", "\n");
        tracing::debug!("Extracted {} characters from document {}", text.len(), document.id);
        Ok(text)
    }
}

/// 固定文本提取器，用于测试与演示，对任意输入返回同一段文本
#[derive(Debug, Clone)]
pub struct FixtureTextExtractor {
    text: String,
}

impl FixtureTextExtractor {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl TextExtractor for FixtureTextExtractor {
    fn name(&self) -> &str {
        "fixture"
    }

    async fn extract_text(&self, _document: &Document, _content: &[u8]) -> Result<String> {
        Ok(self.text.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn document() -> Document {
        Document::new(
            Uuid::new_v4(),
            "note.txt".to_string(),
            "p/note.txt".to_string(),
            "clinical_note".to_string(),
            String::new(),
            0,
        )
    }

    #[tokio::test]
    async fn test_plain_text_extraction() {
        let text = PlainTextExtractor
            .extract_text(&document(), "\u{feff}Fever\r\nCough".as_bytes())
            .await
            .unwrap();
        assert_eq!(text, "Fever\nCough");
    }

    #[tokio::test]
    async fn test_binary_content_needs_ocr_engine() {
        let result = PlainTextExtractor.extract_text(&document(), &[0xff, 0xfe, 0x00, 0x9f]).await;
        assert!(matches!(result, Err(CdssError::Processing { .. })));
    }

    #[tokio::test]
    async fn test_fixture_extractor_ignores_content() {
        let extractor = FixtureTextExtractor::new("Heart rate: 130 bpm");
        let text = extractor.extract_text(&document(), b"%PDF-1.7").await.unwrap();
        assert_eq!(text, "Heart rate: 130 bpm");
    }
}
