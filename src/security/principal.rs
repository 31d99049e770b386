//! Authenticated identity.
//!
//! Authentication itself happens outside this server (a fronting proxy or
//! an extra layer); whatever does it inserts a [`Principal`] extension.
//! Pages with `require_auth` only check for it and its roles.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(subject: impl Into<String>, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            subject: subject.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }

    /// The first of `required` this principal lacks.
    pub fn missing_role<'a>(&self, required: &'a [String]) -> Option<&'a str> {
        required.iter().map(String::as_str).find(|r| !self.has_role(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles() {
        let p = Principal::new("ana", ["Editor"]);
        assert!(p.has_role("editor"));
        let required = vec!["editor".to_string(), "admin".to_string()];
        assert_eq!(p.missing_role(&required), Some("admin"));
        assert_eq!(p.missing_role(&[]), None);
    }
}
