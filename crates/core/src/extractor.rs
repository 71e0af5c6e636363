use crate::error::IngestError;
use lopdf::Document;
use regex::{Captures, Regex};
use std::path::Path;
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// Cleaned text of a whole document, one entry per page in page order.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub full_text: String,
    pub pages: Vec<PageText>,
}

pub trait PdfExtractor {
    /// Returns the raw text of every page in order, including pages without text.
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document = Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            pages.push(PageText {
                number: page_no,
                text: text.split_whitespace().collect::<Vec<_>>().join(" "),
            });
        }

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf has no pages: {}",
                path.display()
            )));
        }

        Ok(pages)
    }
}

/// Repairs the spacing artifacts PDF text runs tend to carry.
pub struct TextCleaner {
    control: Regex,
    spaced_phone: Regex,
    spaced_digits: Regex,
    spaced_letters: Regex,
    spaced_alnum: Regex,
    split_capital: Regex,
    space_before_punct: Regex,
    space_after_paren: Regex,
    whitespace: Regex,
}

impl TextCleaner {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            control: Regex::new(r"[\x00-\x09\x0B\x0C\x0E-\x1F\x7F]+")?,
            spaced_phone: Regex::new(r"\+\s?(?:\d\s?){6,}\d")?,
            spaced_digits: Regex::new(r"\b(?:\d\s){2,}\d\b")?,
            spaced_letters: Regex::new(r"\b(?:[A-Za-z]\s){2,}[A-Za-z]\b")?,
            spaced_alnum: Regex::new(r"\b(?:[A-Za-z0-9]\s){2,}[A-Za-z0-9]\b")?,
            split_capital: Regex::new(r"\b([A-Z])\s+([a-z]{2,})")?,
            space_before_punct: Regex::new(r"\s+([.,:;!?%)])")?,
            space_after_paren: Regex::new(r"\(\s+")?,
            whitespace: Regex::new(r"\s+")?,
        })
    }

    pub fn clean(&self, raw: &str) -> String {
        let text: String = raw.nfkc().collect();
        let text = self.control.replace_all(&text, " ");
        let text = self.spaced_phone.replace_all(&text, squeeze);
        let text = self.spaced_digits.replace_all(&text, squeeze);
        let text = self.spaced_letters.replace_all(&text, squeeze);
        let text = self.spaced_alnum.replace_all(&text, squeeze);
        let text = self.split_capital.replace_all(&text, "$1$2");
        let text = self.space_before_punct.replace_all(&text, "$1");
        let text = self.space_after_paren.replace_all(&text, "(");
        let text = self.whitespace.replace_all(&text, " ");
        text.trim().to_string()
    }
}

fn squeeze(caps: &Captures) -> String {
    caps[0].split_whitespace().collect()
}

pub fn extract_document(
    extractor: &dyn PdfExtractor,
    path: &Path,
    min_text_chars: usize,
) -> Result<ExtractedDocument, IngestError> {
    if !path.is_file() {
        return Err(IngestError::SourceMissing(path.display().to_string()));
    }

    let cleaner = TextCleaner::new()?;
    let pages = extractor
        .extract_pages(path)?
        .into_iter()
        .map(|page| PageText {
            text: cleaner.clean(&page.text),
            ..page
        })
        .collect::<Vec<_>>();

    let full_text = pages
        .iter()
        .map(|page| page.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let chars = full_text.chars().count();
    if chars < min_text_chars {
        return Err(IngestError::InsufficientText {
            path: path.display().to_string(),
            chars,
        });
    }

    Ok(ExtractedDocument { full_text, pages })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    struct FixedPages(Vec<&'static str>);

    impl PdfExtractor for FixedPages {
        fn extract_pages(&self, _path: &Path) -> Result<Vec<PageText>, IngestError> {
            Ok(self
                .0
                .iter()
                .enumerate()
                .map(|(index, text)| PageText {
                    number: index as u32 + 1,
                    text: text.to_string(),
                })
                .collect())
        }
    }

    fn cleaner() -> TextCleaner {
        TextCleaner::new().expect("cleaner regexes compile")
    }

    #[test]
    fn spaced_out_letters_are_joined() {
        assert_eq!(cleaner().clean("H e l l o world"), "Hello world");
    }

    #[test]
    fn spaced_phone_numbers_are_joined() {
        assert_eq!(
            cleaner().clean("Call + 9 1 9 8 7 6 5 4 3 2 1 0 now"),
            "Call +919876543210 now"
        );
    }

    #[test]
    fn split_first_letter_is_merged() {
        assert_eq!(cleaner().clean("T he library"), "The library");
        assert_eq!(cleaner().clean("A bout us"), "About us");
    }

    #[test]
    fn punctuation_spacing_is_normalized() {
        assert_eq!(cleaner().clean("Hello , world ( test ) !"), "Hello, world (test)!");
        assert_eq!(cleaner().clean("rate 50 %"), "rate 50%");
    }

    #[test]
    fn control_characters_and_ligatures_are_normalized() {
        assert_eq!(cleaner().clean("a\u{0007}b \u{FB01}le\n\n  end "), "a b file end");
    }

    #[test]
    fn missing_source_is_reported() {
        let result = extract_document(&LopdfExtractor, Path::new("/no/such/file.pdf"), 20);
        assert!(matches!(result, Err(IngestError::SourceMissing(_))));
    }

    #[test]
    fn unparsable_pdf_is_a_parse_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"%PDF-1.4\n%broken")?;

        let result = extract_document(&LopdfExtractor, &path, 20);
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
        Ok(())
    }

    #[test]
    fn short_documents_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("tiny.pdf");
        fs::write(&path, b"placeholder")?;

        let result = extract_document(&FixedPages(vec!["too short"]), &path, 20);
        assert!(matches!(
            result,
            Err(IngestError::InsufficientText { chars: 9, .. })
        ));
        Ok(())
    }

    #[test]
    fn pages_are_cleaned_and_joined() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("doc.pdf");
        fs::write(&path, b"placeholder")?;

        let document = extract_document(
            &FixedPages(vec!["The Music Club meets Friday .", "   ", "Second page text."]),
            &path,
            20,
        )?;

        assert_eq!(document.pages.len(), 3);
        assert_eq!(document.pages[0].text, "The Music Club meets Friday.");
        assert_eq!(document.pages[1].text, "");
        assert_eq!(document.pages[2].number, 3);
        assert_eq!(
            document.full_text,
            "The Music Club meets Friday.\n\nSecond page text."
        );
        Ok(())
    }
}
