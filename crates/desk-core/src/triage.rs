use crate::record::Priority;

/// Outage-grade vocabulary; any hit classifies the ticket as high priority.
/// Portuguese forms are first-class because that is what the client base
/// actually types.
const CRITICAL_KEYWORDS: &[&str] = &[
    "urgent",
    "urgente",
    "critical",
    "critico",
    "crítico",
    "down",
    "stopped",
    "parou",
    "caiu",
    "fora do ar",
    "error",
    "erro",
];

/// Defect vocabulary; checked only after the critical set misses.
const DEFECT_KEYWORDS: &[&str] = &[
    "bug",
    "problem",
    "problema",
    "failure",
    "falha",
    "defect",
    "defeito",
];

/// Assigns a priority tier to a new ticket from its free text. Pure and
/// total: case-insensitive substring scan over subject + description, the
/// critical set evaluated before the defect set, anything else low. Runs
/// once at creation; the result is only changed by explicit human action.
pub fn classify(subject: &str, description: &str) -> Priority {
    let haystack = format!("{subject} {description}").to_lowercase();

    if CRITICAL_KEYWORDS
        .iter()
        .any(|keyword| haystack.contains(keyword))
    {
        return Priority::High;
    }
    if DEFECT_KEYWORDS
        .iter()
        .any(|keyword| haystack.contains(keyword))
    {
        return Priority::Medium;
    }
    Priority::Low
}
