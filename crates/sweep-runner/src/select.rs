use globset::{GlobBuilder, GlobMatcher};

pub const DRY_RUN_SELECTOR: &str = "dry_run";

/// User-supplied selectors matched against experiment and group names.
///
/// A selector matches a label when it equals it or when it glob-matches it
/// (`*`, `?`, `[...]`). A selector that is not a valid glob only matches by
/// equality. The dry-run selector switches to printing commands and is not
/// itself matched against names.
#[derive(Debug, Clone)]
pub struct Selection {
    matchers: Vec<(String, Option<GlobMatcher>)>,
    dry_run: bool,
}

impl Selection {
    pub fn new<I, S>(selectors: I, dry_run_selector: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut matchers = Vec::new();
        let mut dry_run = false;
        for selector in selectors {
            let selector = selector.as_ref();
            if selector == dry_run_selector {
                dry_run = true;
                continue;
            }
            let glob = match GlobBuilder::new(selector).literal_separator(false).build() {
                Ok(glob) => Some(glob.compile_matcher()),
                Err(err) => {
                    tracing::warn!(selector, error = %err, "selector is not a valid glob; matching it exactly");
                    None
                }
            };
            matchers.push((selector.to_string(), glob));
        }
        Self { matchers, dry_run }
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn matches(&self, label: &str) -> bool {
        self.matchers
            .iter()
            .any(|(raw, glob)| raw == label || glob.as_ref().is_some_and(|g| g.is_match(label)))
    }

    /// A run is eligible when its experiment name or its group is selected.
    pub fn selects(&self, name: &str, group: &str) -> bool {
        self.matches(name) || self.matches(group)
    }
}
