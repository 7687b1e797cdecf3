//! Instruction text sent to the vision model with each document.
//!
//! Kept in one place so the default can be inspected by tests and changed
//! without touching the analysis client. Callers override it with
//! [`crate::config::WorkerConfig::instruction`].

/// Default instruction: a candid résumé critique.
///
/// The page images follow this text in the same user message, in page order.
pub const DEFAULT_INSTRUCTION: &str = "Based on the resume below, Roast this resume\n\n";

/// Context line appended when the document spans several pages, so the model
/// treats the images as one document rather than independent pictures.
pub fn page_context(page_count: usize) -> Option<String> {
    if page_count > 1 {
        Some(format!(
            "The document spans {page_count} pages; the images are in page order."
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_page_has_no_context() {
        assert_eq!(page_context(1), None);
    }

    #[test]
    fn multi_page_context_mentions_count() {
        let ctx = page_context(3).unwrap();
        assert!(ctx.contains('3'));
    }
}
