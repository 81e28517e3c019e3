use ruleflow::core::error::AppError;
use ruleflow::core::types::{ErrorCategory, ErrorSeverity};
use std::io;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation_with_category() {
        let error = AppError::new(ErrorCategory::ValidationError, "Invalid stage".to_string());
        assert_eq!(error.category, ErrorCategory::ValidationError);
        assert_eq!(error.severity, ErrorSeverity::Error);
        assert_eq!(error.message, "Invalid stage");
        assert!(error.code.starts_with("ERR-"));
    }

    #[test]
    fn test_error_severity_mapping() {
        let cases = [
            (ErrorCategory::ConfigurationError, ErrorSeverity::Fatal),
            (ErrorCategory::StateError, ErrorSeverity::Error),
            (ErrorCategory::StorageError, ErrorSeverity::Error),
            (ErrorCategory::LookupError, ErrorSeverity::Warning),
            (ErrorCategory::Unknown, ErrorSeverity::Info),
        ];
        for (category, severity) in cases {
            assert_eq!(AppError::new(category, "x").severity(), severity);
        }
    }

    #[test]
    fn test_display_includes_code_category_and_context() {
        let error = AppError::new(ErrorCategory::LookupError, "no such scope")
            .with_code("RF-SCOPE-002")
            .with_context("add_rule");
        let rendered = error.to_string();
        assert!(rendered.starts_with("[RF-SCOPE-002] LookupError: no such scope"));
        assert!(rendered.contains("add_rule"));
    }

    #[test]
    fn test_add_context_keeps_every_key() {
        let mut error = AppError::new(ErrorCategory::ConfigurationError, "bad expression");
        error.add_context("stage", "merge");
        error.add_context("path", "/tmp/wf.yaml");
        assert_eq!(error.context.len(), 2);
        assert_eq!(error.context.get("stage"), Some(&"merge".to_string()));
    }

    #[test]
    fn test_conversions_keep_their_source() {
        let io_err: AppError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert_eq!(io_err.code, "IO_ERROR");
        assert_eq!(io_err.category, ErrorCategory::IoError);
        assert!(io_err.source.is_some());

        let json_err: AppError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(json_err.category, ErrorCategory::SerializationError);
        assert_eq!(json_err.code, "SERDE_ERROR");

        let any_err: AppError = anyhow::anyhow!("opaque failure").into();
        assert_eq!(any_err.code, "ANYHOW_ERROR");
        assert!(any_err.to_string().contains("Caused by: opaque failure"));
    }

    #[test]
    fn test_with_source_wraps_boxed_errors() {
        let inner: Box<dyn std::error::Error + Send + Sync> =
            Box::new(io::Error::new(io::ErrorKind::Other, "disk full"));
        let error = AppError::with_source(ErrorCategory::StorageError, "commit failed", inner);
        assert!(error.to_string().contains("disk full"));
    }
}
