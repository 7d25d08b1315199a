use std::collections::HashSet;

/// Flattens a row into a canonical key: NULL becomes `NULL`, other values are trimmed,
/// then the values are sorted so column order and labels do not matter.
pub fn normalize_row(row: &[Option<String>]) -> String {
    let mut values: Vec<&str> = row
        .iter()
        .map(|value| match value {
            Some(v) => v.trim(),
            None => "NULL",
        })
        .collect();
    values.sort_unstable();
    values.join("|")
}

/// Order-insensitive result comparison.
///
/// Row counts must agree, then the sets of normalized rows must be identical. Within
/// equal-length results, duplicate multiplicity is not compared: `[a, a, b]` matches
/// `[a, b, b]`.
pub fn result_sets_match(actual: &[Vec<Option<String>>], expected: &[Vec<Option<String>>]) -> bool {
    if actual.len() != expected.len() {
        return false;
    }
    if actual.is_empty() {
        return true;
    }

    let actual: HashSet<String> = actual.iter().map(|row| normalize_row(row)).collect();
    let expected: HashSet<String> = expected.iter().map(|row| normalize_row(row)).collect();

    actual.len() == expected.len() && actual.iter().all(|row| expected.contains(row))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(data: &[&[Option<&str>]]) -> Vec<Vec<Option<String>>> {
        data.iter()
            .map(|row| row.iter().map(|v| v.map(str::to_string)).collect())
            .collect()
    }

    #[test]
    fn test_normalize_row() {
        let row = vec![Some(" 2022101   ".to_string()), None, Some("88".to_string())];
        assert_eq!(normalize_row(&row), "2022101|88|NULL");
    }

    #[test]
    fn test_order_insensitive() {
        let a = rows(&[&[Some("1"), Some("x")], &[Some("2"), Some("y")]]);
        let b = rows(&[&[Some("2"), Some("y")], &[Some("1"), Some("x")]]);
        assert!(result_sets_match(&a, &b));
    }

    #[test]
    fn test_column_order_ignored() {
        let a = rows(&[&[Some("Li Yong"), Some("2022101")]]);
        let b = rows(&[&[Some("2022101"), Some("Li Yong")]]);
        assert!(result_sets_match(&a, &b));
    }

    #[test]
    fn test_empty_sets_match() {
        assert!(result_sets_match(&[], &[]));
    }

    #[test]
    fn test_different_lengths_never_match() {
        let a = rows(&[&[Some("a")], &[Some("a")]]);
        let b = rows(&[&[Some("a")]]);
        assert!(!result_sets_match(&a, &b));
        assert!(!result_sets_match(&b, &a));
        assert!(!result_sets_match(&a, &[]));
    }

    #[test]
    fn test_duplicate_multiplicity_not_detected() {
        let a = rows(&[&[Some("a")], &[Some("a")], &[Some("b")]]);
        let b = rows(&[&[Some("a")], &[Some("b")], &[Some("b")]]);
        assert!(result_sets_match(&a, &b));
    }

    #[test]
    fn test_different_values() {
        let a = rows(&[&[Some("a")], &[None]]);
        let b = rows(&[&[Some("a")], &[Some("b")]]);
        assert!(!result_sets_match(&a, &b));
    }
}
