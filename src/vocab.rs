//! Closed vocabularies of the form: grade codes, occasion codes, and the
//! OCR-confusable spellings a scan tends to produce for them.

use serde::{Deserialize, Serialize};

/// Grade codes in rank order: enlisted, warrant, then commissioned.
pub const GRADES: [&str; 22] = [
    "SGT", "SSGT", "GYSGT", "MSGT", "1STSGT", "MGYSGT", "SGTMAJ", "WO", "CWO2", "CWO3", "CWO4",
    "CWO5", "2NDLT", "1STLT", "CAPT", "MAJ", "LTCOL", "COL", "BGEN", "MAJGEN", "LTGEN", "GEN",
];

pub const OCCASION_CODES: [&str; 13] = [
    "GC", "DC", "CH", "TR", "CD", "TD", "FD", "EN", "CS", "AN", "AR", "SA", "RT",
];

/// Misreadings observed on scanned forms, keyed by the grade they stand for.
/// Checked in order, so the more specific grades come first.
pub const GRADE_CONFUSABLES: &[(&str, &[&str])] = &[
    ("MGYSGT", &["MGYST", "MGSG", "MGYSG", "MGYSGI"]),
    ("SGTMAJ", &["SGTMA", "SGMAJ", "SGTMAS"]),
    ("1STSGT", &["ISTSGT", "1STSG", "ISTSG"]),
    ("LTCOL", &["LRCOL", "LTCO", "LTC", "LTCL", "LICOL", "IRCOL"]),
    ("GYSGT", &["GYSG", "GYST", "GSGT"]),
    ("MSGT", &["SCR", "MSG", "MSGI", "MST"]),
    ("SSGT", &["SSG", "SSGI", "SST"]),
    ("2NDLT", &["2NDL", "2NDLI", "2ND"]),
    ("1STLT", &["1STL", "1STLI", "1ST"]),
    ("CAPT", &["CAP", "CAPU", "CAPI"]),
    ("MAJ", &["MAS", "MA", "MJ", "MAJOR", "MAI", "MAT"]),
];

/// Words printed as field captions that must never be read as a name.
pub const FIELD_LABELS: [&str; 14] = [
    "DUTY", "ASSIGNMENT", "GRADE", "SERVICE", "LAST", "NAME", "INITIALS", "COMMANDER", "OFFICER",
    "SENIOR", "REPORTING", "REVIEWING", "FIRST", "MI",
];

pub const SERVICE_CODES: [&str; 9] = ["USMC", "ANG", "USA", "AFNG", "USAF", "USN", "FMS", "USCG", "USSF"];

/// Immutable vocabulary handed to the locators at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vocabulary {
    pub grades: Vec<String>,
    pub occasion_codes: Vec<String>,
    pub grade_confusables: Vec<(String, Vec<String>)>,
    pub field_labels: Vec<String>,
    pub service_codes: Vec<String>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            grades: owned(&GRADES),
            occasion_codes: owned(&OCCASION_CODES),
            grade_confusables: GRADE_CONFUSABLES
                .iter()
                .map(|(grade, variants)| (grade.to_string(), owned(variants)))
                .collect(),
            field_labels: owned(&FIELD_LABELS),
            service_codes: owned(&SERVICE_CODES),
        }
    }
}

/// Uppercases and keeps only ASCII letters and digits.
pub fn normalize_token(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Maps the digits a scan confuses with letters back to those letters.
fn fold_digits(token: &str) -> String {
    token
        .chars()
        .map(|c| match c {
            '0' => 'O',
            '1' => 'I',
            '5' => 'S',
            '8' => 'B',
            other => other,
        })
        .collect()
}

impl Vocabulary {
    pub fn grade_exact(&self, raw: &str) -> Option<&str> {
        let token = normalize_token(raw);
        self.grades.iter().find(|g| **g == token).map(String::as_str)
    }

    /// Resolves a known misreading to the grade it stands for.
    pub fn grade_confusable(&self, raw: &str) -> Option<&str> {
        let token = normalize_token(raw);
        if token.is_empty() {
            return None;
        }
        self.grade_confusables
            .iter()
            .find(|(_, variants)| variants.iter().any(|v| *v == token))
            .map(|(grade, _)| grade.as_str())
    }

    pub fn occasion(&self, raw: &str) -> Option<&str> {
        let token = normalize_token(raw);
        if token.len() != 2 {
            return None;
        }
        let folded = fold_digits(&token);
        self.occasion_codes
            .iter()
            .find(|c| **c == token || **c == folded)
            .map(String::as_str)
    }

    pub fn is_field_label(&self, raw: &str) -> bool {
        let token = normalize_token(raw);
        self.field_labels.iter().any(|l| *l == token)
    }

    pub fn is_service_code(&self, raw: &str) -> bool {
        let token = normalize_token(raw);
        self.service_codes.iter().any(|s| *s == token)
    }

    /// Position of a grade in [`Vocabulary::grades`], used to sort reports by rank.
    pub fn rank_order(&self, grade: &str) -> Option<usize> {
        self.grades.iter().position(|g| g == grade)
    }

    /// Uppercase alphabetic token of three or more letters that is not a caption,
    /// service or grade code.
    pub fn is_name_like(&self, raw: &str) -> bool {
        let trimmed = raw.trim_matches(|c: char| !c.is_alphanumeric());
        trimmed.len() >= 3
            && trimmed.chars().all(|c| c.is_ascii_uppercase())
            && !self.is_field_label(trimmed)
            && !self.is_service_code(trimmed)
            && self.grade_exact(trimmed).is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_punctuation() {
        assert_eq!(normalize_token(" capt. "), "CAPT");
        assert_eq!(normalize_token("Lt-Col:"), "LTCOL");
    }

    #[test]
    fn exact_grade_beats_confusable() {
        let vocab = Vocabulary::default();
        assert_eq!(vocab.grade_exact("Maj"), Some("MAJ"));
        assert_eq!(vocab.grade_confusable("MAJ"), None);
        assert_eq!(vocab.grade_confusable("LRCOL"), Some("LTCOL"));
        assert_eq!(vocab.grade_confusable("scr"), Some("MSGT"));
    }

    #[test]
    fn occasion_folds_digits() {
        let vocab = Vocabulary::default();
        assert_eq!(vocab.occasion("TR"), Some("TR"));
        assert_eq!(vocab.occasion("5A"), Some("SA"));
        assert_eq!(vocab.occasion("TRX"), None);
    }

    #[test]
    fn name_like_rejects_captions_and_codes() {
        let vocab = Vocabulary::default();
        assert!(vocab.is_name_like("SMITH"));
        assert!(!vocab.is_name_like("USMC"));
        assert!(!vocab.is_name_like("GRADE"));
        assert!(!vocab.is_name_like("MAJ"));
        assert!(!vocab.is_name_like("Smith"));
        assert!(!vocab.is_name_like("JO"));
    }
}
