//! Declarative markup cleanup rules.
//!
//! A source declares its boilerplate regions (bylines, "related articles"
//! blocks, footers) as an ordered list of these rules, keyed by domain.
//! The extractor crate applies them; this crate only defines the vocabulary
//! so rule sets can live in the config file.

use serde::{Deserialize, Serialize};

/// Which match to act on when a selector matches several elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pick {
    First,
    Last,
}

/// One cleanup step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CleanupRule {
    /// Remove every element matching `selector`.
    Remove { selector: String },

    /// Remove the picked match and all of its preceding siblings.
    RemoveWithPreceding {
        selector: String,
        #[serde(default = "pick_first")]
        pick: Pick,
    },

    /// Remove the picked match and all of its following siblings.
    RemoveWithFollowing {
        selector: String,
        #[serde(default = "pick_last")]
        pick: Pick,
    },

    /// Remove the nearest `tag` ancestor of the first text node containing `text`.
    RemoveAncestorWithText { text: String, tag: String },

    /// Narrow the document to the first match of `selector` and its ancestors.
    KeepOnly { selector: String },

    /// From the first match of `path[0]`, descend to the last match of each
    /// following selector and remove the element the path ends on.
    RemoveLastAlong { path: Vec<String> },
}

fn pick_first() -> Pick {
    Pick::First
}
fn pick_last() -> Pick {
    Pick::Last
}

/// Ordered rules for one source domain. `"*"` applies to every domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    pub domain: String,
    pub rules: Vec<CleanupRule>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rules_parse_from_toml() {
        let toml_str = r##"
domain = "blog.example.com"

[[rules]]
kind = "remove"
selector = ".related"

[[rules]]
kind = "remove_with_preceding"
selector = "hr"

[[rules]]
kind = "remove_with_following"
selector = ".copyright"
pick = "first"

[[rules]]
kind = "remove_ancestor_with_text"
text = "Subscribe now"
tag = "p"

[[rules]]
kind = "keep_only"
selector = ".entry-content"

[[rules]]
kind = "remove_last_along"
path = ["#story", "p", "strong"]
"##;
        let set: RuleSet = toml::from_str(toml_str).expect("parse");
        assert_eq!(set.rules.len(), 6);
        assert_eq!(
            set.rules[1],
            CleanupRule::RemoveWithPreceding {
                selector: "hr".into(),
                pick: Pick::First
            }
        );
        assert_eq!(
            set.rules[2],
            CleanupRule::RemoveWithFollowing {
                selector: ".copyright".into(),
                pick: Pick::First
            }
        );
        assert_eq!(
            set.rules[5],
            CleanupRule::RemoveLastAlong {
                path: vec!["#story".into(), "p".into(), "strong".into()]
            }
        );
    }
}
