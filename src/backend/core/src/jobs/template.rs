//! Handler path templates.
//!
//! A template is literal text with `{job_id}` and `{payload_id}`
//! placeholders, e.g. `/internal/documents/{payload_id}/parse?job={job_id}`.
//! Parsing rejects unknown names and unterminated braces up front, so a
//! stored template that parses can only fail to render when the job lacks a
//! payload id it needs.

use std::fmt;

use crate::error::TemplateError;

use super::JobId;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    JobId,
    PayloadId,
}

/// A parsed path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parse a template string.
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = template;
        let mut offset = 0;

        while let Some(open) = rest.find('{') {
            literal.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| TemplateError::Unterminated {
                position: offset + open,
                template: template.to_string(),
            })?;

            let segment = match &after[..close] {
                "job_id" => Segment::JobId,
                "payload_id" => Segment::PayloadId,
                name => {
                    return Err(TemplateError::UnknownPlaceholder {
                        name: name.to_string(),
                        template: template.to_string(),
                    })
                }
            };

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(segment);

            let consumed = open + 1 + close + 1;
            offset += consumed;
            rest = &rest[consumed..];
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    /// Substitute the job's identifiers.
    pub fn render(&self, job_id: JobId, payload_id: Option<i64>) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len() + 16);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::JobId => out.push_str(&job_id.to_string()),
                Segment::PayloadId => {
                    let payload_id = payload_id.ok_or_else(|| TemplateError::MissingValue {
                        name: "payload_id".to_string(),
                        template: self.source.clone(),
                    })?;
                    out.push_str(&payload_id.to_string());
                }
            }
        }
        Ok(out)
    }

    /// Whether rendering needs a payload id.
    pub fn requires_payload_id(&self) -> bool {
        self.segments.contains(&Segment::PayloadId)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for PathTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_both_placeholders() {
        let template = PathTemplate::parse("/documents/{payload_id}/parse?job={job_id}").unwrap();
        assert_eq!(
            template.render(JobId(7), Some(42)).unwrap(),
            "/documents/42/parse?job=7"
        );
        assert!(template.requires_payload_id());
    }

    #[test]
    fn test_render_literal_only() {
        let template = PathTemplate::parse("/internal/cleanup").unwrap();
        assert_eq!(template.render(JobId(1), None).unwrap(), "/internal/cleanup");
        assert!(!template.requires_payload_id());
    }

    #[test]
    fn test_repeated_placeholder() {
        let template = PathTemplate::parse("/{job_id}/{job_id}").unwrap();
        assert_eq!(template.render(JobId(3), None).unwrap(), "/3/3");
    }

    #[test]
    fn test_unknown_placeholder() {
        let err = PathTemplate::parse("/jobs/{tenant}").unwrap_err();
        assert!(matches!(err, TemplateError::UnknownPlaceholder { ref name, .. } if name == "tenant"));
    }

    #[test]
    fn test_unterminated_placeholder() {
        let err = PathTemplate::parse("/jobs/{job_id}/{payload").unwrap_err();
        assert!(matches!(err, TemplateError::Unterminated { position: 15, .. }));
    }

    #[test]
    fn test_missing_payload_id() {
        let template = PathTemplate::parse("/media/{payload_id}").unwrap();
        let err = template.render(JobId(5), None).unwrap_err();
        assert!(matches!(err, TemplateError::MissingValue { ref name, .. } if name == "payload_id"));
    }

    #[test]
    fn test_closing_brace_is_literal() {
        let template = PathTemplate::parse("/a}b/{job_id}").unwrap();
        assert_eq!(template.render(JobId(9), None).unwrap(), "/a}b/9");
    }
}
