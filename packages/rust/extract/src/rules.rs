//! Domain-keyed markup cleanup applied before extraction.
//!
//! Rules mutate the parsed document in place. Each rule first resolves its
//! targets against an immutable view, then detaches them, so a rule that
//! cannot be resolved leaves the document exactly as it found it.

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use trendlyze_shared::{CleanupRule, Pick, Result, RuleSet, TrendlyzeError};

/// Domain key that applies to every source.
const ANY_DOMAIN: &str = "*";

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Ordered cleanup rule sets keyed by source domain.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    sets: Vec<RuleSet>,
}

impl RuleRegistry {
    /// A registry with no rules.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The rule sets for sources known to carry boilerplate inside their article body.
    pub fn builtin() -> Self {
        Self {
            sets: vec![
                RuleSet {
                    domain: "blog.daehong.com".into(),
                    rules: vec![
                        CleanupRule::KeepOnly {
                            selector: ".entry-content .contents_style".into(),
                        },
                        CleanupRule::Remove {
                            selector: ".related-articles".into(),
                        },
                        CleanupRule::Remove {
                            selector: ".another_category".into(),
                        },
                        CleanupRule::RemoveWithPreceding {
                            selector: ".entry-content > .contents_style > hr".into(),
                            pick: Pick::First,
                        },
                    ],
                },
                RuleSet {
                    domain: "ditoday.com".into(),
                    rules: vec![
                        CleanupRule::RemoveWithFollowing {
                            selector: ".copyright".into(),
                            pick: Pick::Last,
                        },
                        CleanupRule::RemoveAncestorWithText {
                            text: "컨슈머 모먼트 리포트 보러 가기".into(),
                            tag: "p".into(),
                        },
                    ],
                },
                RuleSet {
                    domain: "brandbrief.co.kr".into(),
                    rules: vec![CleanupRule::RemoveLastAlong {
                        path: vec![
                            "#article-view-content-div".into(),
                            "p".into(),
                            "strong".into(),
                        ],
                    }],
                },
                RuleSet {
                    domain: "mobiinside.co.kr".into(),
                    rules: vec![CleanupRule::RemoveWithFollowing {
                        selector: ".td-post-content > hr".into(),
                        pick: Pick::Last,
                    }],
                },
                RuleSet {
                    domain: ANY_DOMAIN.into(),
                    rules: vec![CleanupRule::Remove {
                        selector: "footer".into(),
                    }],
                },
            ],
        }
    }

    /// Append rule sets (e.g. from the config file) after the existing ones.
    pub fn with_sets(mut self, sets: impl IntoIterator<Item = RuleSet>) -> Self {
        self.sets.extend(sets);
        self
    }

    /// Rules that apply to `domain`: matching domain sets in declared order,
    /// then the `"*"` sets.
    pub fn rules_for(&self, domain: Option<&str>) -> Vec<&CleanupRule> {
        let specific = self.sets.iter().filter(|set| {
            set.domain != ANY_DOMAIN && domain.is_some_and(|d| domain_matches(d, &set.domain))
        });
        let global = self.sets.iter().filter(|set| set.domain == ANY_DOMAIN);

        specific
            .chain(global)
            .flat_map(|set| set.rules.iter())
            .collect()
    }

    /// Apply every rule for `domain` to `doc`. Returns the number of nodes removed.
    ///
    /// Failing rules are logged and skipped.
    pub fn apply(&self, doc: &mut Html, domain: Option<&str>) -> usize {
        let mut removed = 0;
        for rule in self.rules_for(domain) {
            match apply_rule(doc, rule) {
                Ok(n) => {
                    debug!(?rule, removed = n, "cleanup rule applied");
                    removed += n;
                }
                Err(e) => warn!(?rule, error = %e, "cleanup rule failed, skipping"),
            }
        }
        removed
    }
}

/// `host` equals `domain` or is a subdomain of it.
fn domain_matches(host: &str, domain: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let domain = domain.to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{domain}"))
}

// ---------------------------------------------------------------------------
// Rule application
// ---------------------------------------------------------------------------

/// Apply a single rule. Returns the number of nodes detached.
pub fn apply_rule(doc: &mut Html, rule: &CleanupRule) -> Result<usize> {
    let targets = match rule {
        CleanupRule::Remove { selector } => {
            let sel = parse_selector(selector)?;
            doc.select(&sel).map(|el| el.id()).collect::<Vec<_>>()
        }
        CleanupRule::RemoveWithPreceding { selector, pick } => {
            let sel = parse_selector(selector)?;
            match pick_match(doc, &sel, *pick) {
                Some(el) => {
                    let mut ids: Vec<_> = el.prev_siblings().map(|n| n.id()).collect();
                    ids.push(el.id());
                    ids
                }
                None => Vec::new(),
            }
        }
        CleanupRule::RemoveWithFollowing { selector, pick } => {
            let sel = parse_selector(selector)?;
            match pick_match(doc, &sel, *pick) {
                Some(el) => {
                    let mut ids = vec![el.id()];
                    ids.extend(el.next_siblings().map(|n| n.id()));
                    ids
                }
                None => Vec::new(),
            }
        }
        CleanupRule::RemoveAncestorWithText { text, tag } => {
            if text.is_empty() {
                return Err(TrendlyzeError::validation(
                    "remove_ancestor_with_text needs a non-empty text",
                ));
            }
            doc.tree
                .root()
                .descendants()
                .find(|n| n.value().as_text().is_some_and(|t| t.contains(text.as_str())))
                .and_then(|n| {
                    n.ancestors().find(|a| {
                        a.value()
                            .as_element()
                            .is_some_and(|e| e.name().eq_ignore_ascii_case(tag))
                    })
                })
                .map(|a| vec![a.id()])
                .unwrap_or_default()
        }
        CleanupRule::KeepOnly { selector } => {
            let sel = parse_selector(selector)?;
            match doc.select(&sel).next() {
                Some(el) => {
                    let mut ids = Vec::new();
                    let mut node = *el;
                    loop {
                        ids.extend(node.prev_siblings().map(|n| n.id()));
                        ids.extend(node.next_siblings().map(|n| n.id()));
                        match node.parent() {
                            Some(parent) => node = parent,
                            None => break,
                        }
                    }
                    ids
                }
                None => Vec::new(),
            }
        }
        CleanupRule::RemoveLastAlong { path } => {
            let Some((first, rest)) = path.split_first() else {
                return Err(TrendlyzeError::validation(
                    "remove_last_along needs at least one selector",
                ));
            };
            let sel = parse_selector(first)?;
            let mut current = doc.select(&sel).next();
            for selector in rest {
                let sel = parse_selector(selector)?;
                current = current.and_then(|el| el.select(&sel).last());
            }
            current.map(|el| vec![el.id()]).unwrap_or_default()
        }
    };

    let count = targets.len();
    for id in targets {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }
    Ok(count)
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| TrendlyzeError::parse(format!("invalid selector '{selector}': {e:?}")))
}

fn pick_match<'a>(doc: &'a Html, sel: &Selector, pick: Pick) -> Option<ElementRef<'a>> {
    match pick {
        Pick::First => doc.select(sel).next(),
        Pick::Last => doc.select(sel).last(),
    }
}
