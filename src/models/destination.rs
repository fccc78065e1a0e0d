//! Destination descriptors: where a collected upload lands in persistent storage.

use std::{fmt, sync::Arc};

/// Function that maps an original filename to a persistent path.
pub type NamingFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Resolved upstream per upload field and handed to the coordinator.
#[derive(Clone)]
pub enum Destination {
    /// strftime-style directory template, e.g. `uploads/%Y/%m/%d`.
    /// The filename is joined underneath the formatted directory.
    Template(String),

    /// Caller-supplied naming function invoked with the original filename.
    Naming(NamingFn),
}

impl Destination {
    pub fn template(template: impl Into<String>) -> Self {
        Self::Template(template.into())
    }

    pub fn naming<F>(f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self::Naming(Arc::new(f))
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Template(template) => f.debug_tuple("Template").field(template).finish(),
            Self::Naming(_) => f.debug_tuple("Naming").field(&"<fn>").finish(),
        }
    }
}

/// Parse a `name=template` pair as accepted on the command line.
pub fn parse_destination_arg(raw: &str) -> Result<(String, Destination), String> {
    let (name, template) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=TEMPLATE, got `{}`", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("destination name missing in `{}`", raw));
    }
    Ok((name.to_string(), Destination::template(template.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_and_template() {
        let (name, dest) = parse_destination_arg("avatars=media/avatars/%Y").unwrap();
        assert_eq!(name, "avatars");
        match dest {
            Destination::Template(t) => assert_eq!(t, "media/avatars/%Y"),
            Destination::Naming(_) => panic!("expected template"),
        }
    }

    #[test]
    fn rejects_missing_separator_and_empty_name() {
        assert!(parse_destination_arg("uploads").is_err());
        assert!(parse_destination_arg("=uploads").is_err());
    }

    #[test]
    fn empty_template_is_allowed() {
        let (_, dest) = parse_destination_arg("root=").unwrap();
        assert!(matches!(dest, Destination::Template(t) if t.is_empty()));
    }
}
