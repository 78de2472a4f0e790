// Placeholder Interpolation
// Scans `${{ ... }}` placeholders and substitutes matrix, secret and env references

use std::collections::BTreeSet;

/// A context reference inside a placeholder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// `matrix.<axis>`
    Matrix(String),
    /// `secrets.<NAME>`; names are upper-cased
    Secret(String),
    /// `env.<NAME>`
    Env(String),
}

impl Reference {
    /// Parse the inside of a placeholder. Returns `None` for expressions
    /// this engine does not evaluate (functions, other contexts).
    pub fn parse(expr: &str) -> Option<Self> {
        let (context, key) = expr.trim().split_once('.')?;
        let key = key.trim();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return None;
        }

        match context.trim() {
            "matrix" => Some(Reference::Matrix(key.to_string())),
            "secrets" => Some(Reference::Secret(key.to_ascii_uppercase())),
            "env" => Some(Reference::Env(key.to_string())),
            _ => None,
        }
    }
}

/// A `${{ ... }}` occurrence with byte offsets into the source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub start: usize,
    pub end: usize,
    pub expr: String,
}

/// Find every complete `${{ ... }}` placeholder in `text`
pub fn placeholders(text: &str) -> Vec<Placeholder> {
    let mut found = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = text[cursor..].find("${{") {
        let start = cursor + offset;
        let body_start = start + 3;
        match text[body_start..].find("}}") {
            Some(close) => {
                let end = body_start + close + 2;
                found.push(Placeholder {
                    start,
                    end,
                    expr: text[body_start..body_start + close].trim().to_string(),
                });
                cursor = end;
            }
            None => break,
        }
    }

    found
}

/// Names of all secrets referenced in `text`
pub fn secret_names(text: &str) -> BTreeSet<String> {
    placeholders(text)
        .into_iter()
        .filter_map(|p| match Reference::parse(&p.expr) {
            Some(Reference::Secret(name)) => Some(name),
            _ => None,
        })
        .collect()
}

/// Whether `text` references any secret
pub fn references_secrets(text: &str) -> bool {
    !secret_names(text).is_empty()
}

/// Substitute placeholders in `text`.
///
/// `resolve` returns `Some(value)` to replace a reference and `None` to
/// leave the placeholder untouched. Placeholders that are not recognised
/// references are always left as written.
pub fn interpolate<F, E>(text: &str, mut resolve: F) -> Result<String, E>
where
    F: FnMut(&Reference) -> Result<Option<String>, E>,
{
    let mut result = String::with_capacity(text.len());
    let mut cursor = 0;

    for placeholder in placeholders(text) {
        result.push_str(&text[cursor..placeholder.start]);
        let replacement = match Reference::parse(&placeholder.expr) {
            Some(reference) => resolve(&reference)?,
            None => None,
        };
        match replacement {
            Some(value) => result.push_str(&value),
            None => result.push_str(&text[placeholder.start..placeholder.end]),
        }
        cursor = placeholder.end;
    }

    result.push_str(&text[cursor..]);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::convert::Infallible;

    #[test]
    fn test_parse_references() {
        assert_eq!(
            Reference::parse("matrix.os"),
            Some(Reference::Matrix("os".to_string()))
        );
        assert_eq!(
            Reference::parse(" secrets.api_token "),
            Some(Reference::Secret("API_TOKEN".to_string()))
        );
        assert_eq!(
            Reference::parse("env.HOME"),
            Some(Reference::Env("HOME".to_string()))
        );
        assert_eq!(Reference::parse("github.ref"), None);
        assert_eq!(Reference::parse("format('{0}', matrix.os)"), None);
        assert_eq!(Reference::parse("matrix."), None);
    }

    #[test]
    fn test_placeholders_offsets() {
        let text = "a ${{ matrix.os }} b ${{secrets.X}}";
        let found = placeholders(text);

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].expr, "matrix.os");
        assert_eq!(&text[found[0].start..found[0].end], "${{ matrix.os }}");
        assert_eq!(found[1].expr, "secrets.X");
    }

    #[test]
    fn test_unterminated_placeholder_ignored() {
        assert!(placeholders("echo ${{ matrix.os").is_empty());
    }

    #[test]
    fn test_secret_names() {
        let names = secret_names("${{ secrets.B }} ${{ secrets.a }} ${{ matrix.x }} ${{ secrets.B }}");
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["A", "B"]);
        assert!(!references_secrets("plain text"));
    }

    #[test]
    fn test_interpolate_leaves_unknown_untouched() {
        let out = interpolate::<_, Infallible>(
            "os=${{ matrix.os }} ref=${{ github.ref }} tag=${{ matrix.tag }}",
            |reference| {
                Ok(match reference {
                    Reference::Matrix(axis) if axis == "os" => Some("linux".to_string()),
                    _ => None,
                })
            },
        )
        .unwrap();

        assert_eq!(out, "os=linux ref=${{ github.ref }} tag=${{ matrix.tag }}");
    }

    #[test]
    fn test_interpolate_propagates_errors() {
        let result = interpolate("${{ secrets.MISSING }}", |reference| match reference {
            Reference::Secret(name) => Err(format!("missing {}", name)),
            _ => Ok(None),
        });
        assert_eq!(result.unwrap_err(), "missing MISSING");
    }

    #[test]
    fn test_interpolate_multibyte_text() {
        let out = interpolate::<_, Infallible>("héllo ${{ env.NAME }} wörld", |_| {
            Ok(Some("ünï".to_string()))
        })
        .unwrap();
        assert_eq!(out, "héllo ünï wörld");
    }
}
