use serde::{Deserialize, Serialize};

/// One street name synonym as stored alongside a cluster.
/// The order of a cluster's names is the output text order.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Name {
    #[serde(default)]
    pub tokenized: String,
    #[serde(default)]
    pub tokenless: String,
    #[serde(default)]
    pub display: String,
}

impl Name {
    pub fn new(
        tokenized: impl Into<String>,
        tokenless: impl Into<String>,
        display: impl Into<String>,
    ) -> Self {
        Self {
            tokenized: tokenized.into(),
            tokenless: tokenless.into(),
            display: display.into(),
        }
    }

    /// A name with only whitespace in its display text can't be indexed
    pub fn is_blank(&self) -> bool {
        self.display.trim().is_empty()
    }
}

/// Names with a usable display text, original order preserved
pub fn display_names(names: &[Name]) -> Vec<Name> {
    names.iter().filter(|name| !name.is_blank()).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_names_are_filtered_in_order() {
        let names = vec![
            Name::new("main st", "main", "Main Street"),
            Name::new("", "", "   "),
            Name::new("main rd", "main", "Main Road"),
            Name::new("", "", ""),
        ];

        let display = display_names(&names);

        assert_eq!(display.len(), 2);
        assert_eq!(display[0].display, "Main Street");
        assert_eq!(display[1].display, "Main Road");
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let name: Name = serde_json::from_str(r#"{ "display": "Fake Avenue" }"#).unwrap();

        assert_eq!(name.tokenized, "");
        assert!(!name.is_blank());
    }
}
