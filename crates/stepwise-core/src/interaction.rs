//! Button payload parsing.
//!
//! Interactive buttons carry a short string payload of the form
//! `action?key=value&key2=value2`. The action selects a route; the arguments
//! carry whatever the button needs (an item id, a page number, ...).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A parsed button payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionData {
    pub action: String,
    pub args: BTreeMap<String, String>,
}

impl InteractionData {
    /// Parses `action?key=value&...`.
    ///
    /// A payload without `?` is all action. Pairs that do not split into
    /// exactly one key and one value are skipped; keys and values are trimmed.
    pub fn parse(data: &str) -> Self {
        let (action, query) = match data.split_once('?') {
            Some((action, query)) => (action, Some(query)),
            None => (data, None),
        };

        let args = query
            .into_iter()
            .flat_map(|q| q.split('&'))
            .filter_map(|pair| {
                let mut parts = pair.split('=');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(k), Some(v), None) => Some((k.trim().to_owned(), v.trim().to_owned())),
                    _ => None,
                }
            })
            .collect();

        Self {
            action: action.trim().to_owned(),
            args,
        }
    }

    /// Returns the argument named `key`.
    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(String::as_str)
    }

    /// Builds a payload string from an action and arguments.
    pub fn encode<'a>(action: &str, args: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
        let query = args
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        if query.is_empty() {
            action.to_owned()
        } else {
            format!("{action}?{query}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_action_only() {
        let data = InteractionData::parse("cancel");
        assert_eq!(data.action, "cancel");
        assert!(data.args.is_empty());
    }

    #[test]
    fn test_parse_with_args() {
        let data = InteractionData::parse("item?id=42& page = 3");
        assert_eq!(data.action, "item");
        assert_eq!(data.arg("id"), Some("42"));
        assert_eq!(data.arg("page"), Some("3"));
    }

    #[test]
    fn test_parse_skips_malformed_pairs() {
        let data = InteractionData::parse("cart?bad&a=1=2&ok=yes");
        assert_eq!(data.args.len(), 1);
        assert_eq!(data.arg("ok"), Some("yes"));
    }

    #[test]
    fn test_encode() {
        assert_eq!(
            InteractionData::encode("item", [("id", "42"), ("page", "3")]),
            "item?id=42&page=3"
        );
        assert_eq!(InteractionData::encode("cancel", []), "cancel");
    }
}
