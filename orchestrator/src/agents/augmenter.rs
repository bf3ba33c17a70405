// Augmenter: folds retrieved reviews into the active user turn

use std::fmt::Write;

use crate::models::MatchResult;

pub const RESULTS_HEADER: &str = "Returned results from vector db (done automatically):";
pub const NO_RESULTS_MARKER: &str = "No matching professors were found.";

/// Appends one block per match, in input order. Pure: same input, same bytes.
pub fn augment(content: &str, matches: &[MatchResult]) -> String {
    let mut out = String::with_capacity(content.len() + 64 + matches.len() * 160);
    out.push_str(content);
    out.push_str("\n\n");
    out.push_str(RESULTS_HEADER);
    out.push('\n');

    if matches.is_empty() {
        out.push_str(NO_RESULTS_MARKER);
        out.push('\n');
        return out;
    }

    for m in matches {
        // Writing to a String cannot fail.
        let _ = write!(
            out,
            "\nReturned Results:\nProfessor: {}\nReview: {}\nSubject: {}\nStars: {}\n",
            m.id, m.metadata.review, m.metadata.subject, m.metadata.stars
        );
    }
    out
}
