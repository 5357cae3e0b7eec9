//! Upstream error messages are free text; these helpers sort them into the few
//! categories the importer reacts to.

/// Messages of nodes that no longer have the state of old blocks.
const ARCHIVE_NODE_PATTERNS: &[&str] = &[
    "missing trie node",
    "header not found",
    "historical state",
    "state histories haven't been fully indexed",
    "history has been pruned",
    "pruned history unavailable",
    "state is not available",
    "archive",
];

/// Messages of nodes refusing a query because its block span or result is too big.
const RESPONSE_TOO_LARGE_PATTERNS: &[&str] = &[
    "query returned more than",
    "block range is too wide",
    "block range too large",
    "exceed maximum block range",
    "response size exceeded",
    "response size should not greater than",
    "log response size exceeded",
    "too many results",
];

/// Explorer answers that mean "nothing there" rather than failure.
const NO_RECORDS_PATTERNS: &[&str] =
    &["no records found", "no logs found", "no transactions found"];

fn matches_any(message: &str, patterns: &[&str]) -> bool {
    let message = message.to_lowercase();
    patterns.iter().any(|pattern| message.contains(pattern))
}

/// The node lacks historical state; retrying on the same endpoint is pointless.
pub fn is_archive_node_error(message: &str) -> bool {
    matches_any(message, ARCHIVE_NODE_PATTERNS)
}

/// The query should be split into smaller block spans.
pub fn is_response_too_large(message: &str) -> bool {
    matches_any(message, RESPONSE_TOO_LARGE_PATTERNS)
}

/// An explorer "empty result" answer.
pub fn is_no_records_found(message: &str) -> bool {
    matches_any(message, NO_RECORDS_PATTERNS)
}
