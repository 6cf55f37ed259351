//! Challenge evaluation: which challenge applies to a student, and whether the
//! output they report satisfies it.

use crate::error::Result;
use crate::models::{Challenge, ExecutionOutput, UserId};
use crate::store::Repo;

/// A student's override wins over the lesson's canonical challenge.
pub async fn active_challenge<R: Repo>(
    repo: &mut R,
    student_id: Option<UserId>,
    lesson_id: &str,
) -> Result<Option<Challenge>> {
    if let Some(student_id) = student_id {
        if let Some(sc) = repo.student_challenge(student_id, lesson_id).await? {
            return Ok(Some(sc.into()));
        }
    }
    Ok(repo.challenge(lesson_id).await?)
}

/// Canonical text form of reported output.
///
/// Lines are trimmed, empty lines skipped, the rest joined with one space.
pub fn normalize(output: &ExecutionOutput) -> String {
    match output {
        ExecutionOutput::Lines(lines) => lines
            .iter()
            .filter(|line| !line.is_empty())
            .map(|line| line.trim())
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string(),
        ExecutionOutput::Text(text) => text.trim().to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The program failed to run. Never recorded.
    ExecutionError(String),
    /// Nothing to compare against; accepted as-is.
    Unchecked,
    Matched { expected: String },
    Mismatch { expected: String },
}

impl Verdict {
    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Unchecked | Verdict::Matched { .. })
    }

    pub fn expected(&self) -> Option<&str> {
        match self {
            Verdict::Matched { expected } | Verdict::Mismatch { expected } => Some(expected),
            _ => None,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Verdict::ExecutionError(_) => "Your code raised an error. Fix it and try again.",
            Verdict::Unchecked => "Code ran successfully. Your work was sent for review.",
            Verdict::Matched { .. } => "Challenge passed! Your work was sent for review.",
            Verdict::Mismatch { .. } => "Challenge not passed. Check your code and try again.",
        }
    }
}

pub fn judge(challenge: Option<&Challenge>, output: &ExecutionOutput, error: Option<&str>) -> Verdict {
    if let Some(err) = error.filter(|e| !e.is_empty()) {
        return Verdict::ExecutionError(err.to_string());
    }
    let Some(expected) = challenge.and_then(|c| c.expected_output.as_deref()) else {
        return Verdict::Unchecked;
    };
    // an empty expected value means "not checked", same as an absent one
    if expected.is_empty() {
        return Verdict::Unchecked;
    }
    let expected = expected.to_string();
    if normalize(output) == expected.trim() {
        Verdict::Matched { expected }
    } else {
        Verdict::Mismatch { expected }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(v: &[&str]) -> ExecutionOutput {
        ExecutionOutput::Lines(v.iter().map(|s| s.to_string()).collect())
    }

    fn expecting(expected: Option<&str>) -> Challenge {
        Challenge {
            lesson_id: "l1".into(),
            instructions: "print ten".into(),
            initial_code: String::new(),
            expected_output: expected.map(str::to_string),
            hints: vec![],
        }
    }

    #[test]
    fn normalizes_lines() {
        assert_eq!(normalize(&lines(&["10"])), "10");
        assert_eq!(normalize(&lines(&[" 10 ", ""])), "10");
        assert_eq!(normalize(&lines(&["a", "", "b "])), "a b");
        assert_eq!(normalize(&lines(&[])), "");
        assert_eq!(normalize(&ExecutionOutput::Text("  hi \n".into())), "hi");
    }

    #[test]
    fn equal_output_passes() {
        let c = expecting(Some("10"));
        assert_eq!(
            judge(Some(&c), &lines(&["10"]), None),
            Verdict::Matched { expected: "10".into() }
        );
        assert!(judge(Some(&c), &lines(&[" 10 ", ""]), None).passed());
        assert!(judge(Some(&c), &ExecutionOutput::Text("10\n".into()), None).passed());
    }

    #[test]
    fn different_output_fails() {
        let c = expecting(Some("9"));
        let v = judge(Some(&c), &lines(&["8"]), None);
        assert!(!v.passed());
        assert_eq!(v.expected(), Some("9"));
    }

    #[test]
    fn multi_line_expectations_compare_joined() {
        let c = expecting(Some("1 2 3"));
        assert!(judge(Some(&c), &lines(&["1", "2", "3"]), None).passed());
        assert!(!judge(Some(&c), &lines(&["123"]), None).passed());
    }

    #[test]
    fn error_fails_even_when_output_matches() {
        let c = expecting(Some("10"));
        let v = judge(Some(&c), &lines(&["10"]), Some("attempt to call a nil value"));
        assert_eq!(v, Verdict::ExecutionError("attempt to call a nil value".into()));
        assert!(!v.passed());
    }

    #[test]
    fn empty_error_is_ignored() {
        assert_eq!(judge(None, &lines(&["x"]), Some("")), Verdict::Unchecked);
    }

    #[test]
    fn nothing_to_check_passes() {
        assert_eq!(judge(None, &lines(&["anything"]), None), Verdict::Unchecked);
        let c = expecting(None);
        assert_eq!(judge(Some(&c), &lines(&["anything"]), None), Verdict::Unchecked);
    }
}
