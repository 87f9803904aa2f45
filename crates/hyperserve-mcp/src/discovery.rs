//! Tool discovery policy.
//!
//! Controls what `tools/list` and the discovery documents reveal to a
//! given caller. Hidden tools (leading `_` / `internal_`) and dev-only
//! tools outside dev mode are suppressed before the policy applies.

use std::sync::Arc;

use hyperserve_protocol::types::ToolDescriptor;

use crate::dispatcher::RequestMeta;

/// Rule selecting which tools are listed to which callers.
#[derive(Clone, Default)]
pub enum DiscoveryPolicy {
    /// List every discoverable tool (the default).
    #[default]
    Public,
    /// Full listing for authenticated callers; counts only otherwise.
    Authenticated,
    /// Only `{count}` - no names or schemas, for anyone.
    CountOnly,
    /// `{count: 0}` and no list, for anyone.
    None,
    /// Caller-supplied predicate over `(tool_name, request)`.
    Custom(Arc<dyn Fn(&str, &RequestMeta) -> bool + Send + Sync>),
}

impl std::fmt::Debug for DiscoveryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Public => "Public",
            Self::Authenticated => "Authenticated",
            Self::CountOnly => "CountOnly",
            Self::None => "None",
            Self::Custom(_) => "Custom(..)",
        };
        write!(f, "DiscoveryPolicy::{name}")
    }
}

/// Outcome of applying the policy.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolListing {
    /// Full descriptors
    Tools(Vec<ToolDescriptor>),
    /// Count only
    Count(usize),
}

impl DiscoveryPolicy {
    /// Apply the policy to the already-visibility-filtered candidates.
    pub fn apply(&self, candidates: Vec<ToolDescriptor>, meta: &RequestMeta) -> ToolListing {
        match self {
            Self::Public => ToolListing::Tools(candidates),
            Self::Authenticated => {
                if meta.authorized {
                    ToolListing::Tools(candidates)
                } else {
                    ToolListing::Count(candidates.len())
                }
            }
            Self::CountOnly => ToolListing::Count(candidates.len()),
            Self::None => ToolListing::Count(0),
            Self::Custom(predicate) => ToolListing::Tools(
                candidates
                    .into_iter()
                    .filter(|tool| predicate(&tool.name, meta))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidates() -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor {
                name: "calculator".into(),
                description: "arithmetic".into(),
                input_schema: json!({"type": "object"}),
            },
            ToolDescriptor {
                name: "mcp__files__read_file".into(),
                description: "read".into(),
                input_schema: json!({"type": "object"}),
            },
        ]
    }

    fn meta(authorized: bool) -> RequestMeta {
        RequestMeta {
            authorized,
            ..RequestMeta::default()
        }
    }

    #[test]
    fn public_lists_everything() {
        let listing = DiscoveryPolicy::Public.apply(candidates(), &meta(false));
        assert_eq!(listing, ToolListing::Tools(candidates()));
    }

    #[test]
    fn authenticated_downgrades_to_count() {
        let policy = DiscoveryPolicy::Authenticated;
        assert_eq!(policy.apply(candidates(), &meta(false)), ToolListing::Count(2));
        assert_eq!(policy.apply(candidates(), &meta(true)), ToolListing::Tools(candidates()));
    }

    #[test]
    fn count_and_none() {
        assert_eq!(
            DiscoveryPolicy::CountOnly.apply(candidates(), &meta(true)),
            ToolListing::Count(2)
        );
        assert_eq!(
            DiscoveryPolicy::None.apply(candidates(), &meta(true)),
            ToolListing::Count(0)
        );
    }

    #[test]
    fn custom_predicate_filters_by_name() {
        let policy = DiscoveryPolicy::Custom(Arc::new(|name, _| name == "calculator"));
        match policy.apply(candidates(), &meta(false)) {
            ToolListing::Tools(tools) => {
                assert_eq!(tools.len(), 1);
                assert_eq!(tools[0].name, "calculator");
            }
            ToolListing::Count(_) => panic!("expected tools"),
        }
    }
}
