use std::collections::HashSet;

/// The id triple that grants a teacher mark-entry rights.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssignmentKey {
    pub teacher_id: String,
    pub subject_id: String,
    pub semester_id: String,
}

impl AssignmentKey {
    pub fn new(teacher_id: &str, subject_id: &str, semester_id: &str) -> Self {
        Self {
            teacher_id: teacher_id.to_string(),
            subject_id: subject_id.to_string(),
            semester_id: semester_id.to_string(),
        }
    }
}

/// Semesters in which the teacher holds at least one assignment, deduplicated,
/// in first-seen order.
pub fn semesters_for(teacher_id: &str, assignments: &[AssignmentKey]) -> Vec<String> {
    let mut seen = HashSet::new();
    assignments
        .iter()
        .filter(|a| a.teacher_id == teacher_id)
        .filter(|a| seen.insert(a.semester_id.as_str()))
        .map(|a| a.semester_id.clone())
        .collect()
}

pub fn subjects_for(teacher_id: &str, semester_id: &str, assignments: &[AssignmentKey]) -> Vec<String> {
    let mut seen = HashSet::new();
    assignments
        .iter()
        .filter(|a| a.teacher_id == teacher_id && a.semester_id == semester_id)
        .filter(|a| seen.insert(a.subject_id.as_str()))
        .map(|a| a.subject_id.clone())
        .collect()
}

pub fn is_assigned(
    teacher_id: &str,
    subject_id: &str,
    semester_id: &str,
    assignments: &[AssignmentKey],
) -> bool {
    assignments.iter().any(|a| {
        a.teacher_id == teacher_id && a.subject_id == subject_id && a.semester_id == semester_id
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub semester_id: Option<String>,
    pub subject_id: Option<String>,
}

/// Applies a semester choice. The semester gates the subject: a previously
/// selected subject survives only if it is valid for the new semester.
pub fn select_semester(
    teacher_id: &str,
    current: &Selection,
    semester_id: &str,
    assignments: &[AssignmentKey],
) -> (Selection, Vec<String>) {
    let subjects = subjects_for(teacher_id, semester_id, assignments);
    let subject_id = current
        .subject_id
        .as_ref()
        .filter(|s| subjects.iter().any(|v| v == *s))
        .cloned();
    (
        Selection {
            semester_id: Some(semester_id.to_string()),
            subject_id,
        },
        subjects,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Vec<AssignmentKey> {
        vec![
            AssignmentKey::new("T1", "SubjA", "Sem1"),
            AssignmentKey::new("T1", "SubjB", "Sem2"),
            AssignmentKey::new("T2", "SubjC", "Sem1"),
        ]
    }

    #[test]
    fn semester_gates_subjects() {
        let a = fixture();
        assert_eq!(subjects_for("T1", "Sem1", &a), vec!["SubjA".to_string()]);
        assert_eq!(subjects_for("T1", "Sem2", &a), vec!["SubjB".to_string()]);
        assert!(subjects_for("T1", "Sem3", &a).is_empty());
    }

    #[test]
    fn semesters_are_deduplicated() {
        let mut a = fixture();
        a.push(AssignmentKey::new("T1", "SubjC", "Sem1"));
        a.push(AssignmentKey::new("T1", "SubjA", "Sem1"));
        assert_eq!(
            semesters_for("T1", &a),
            vec!["Sem1".to_string(), "Sem2".to_string()]
        );
        assert_eq!(
            subjects_for("T1", "Sem1", &a),
            vec!["SubjA".to_string(), "SubjC".to_string()]
        );
    }

    #[test]
    fn changing_semester_drops_invalid_subject() {
        let a = fixture();
        let current = Selection {
            semester_id: Some("Sem1".to_string()),
            subject_id: Some("SubjA".to_string()),
        };
        let (next, subjects) = select_semester("T1", &current, "Sem2", &a);
        assert_eq!(next.semester_id.as_deref(), Some("Sem2"));
        assert_eq!(next.subject_id, None);
        assert_eq!(subjects, vec!["SubjB".to_string()]);
    }

    #[test]
    fn reselecting_semester_keeps_valid_subject() {
        let a = fixture();
        let current = Selection {
            semester_id: Some("Sem1".to_string()),
            subject_id: Some("SubjA".to_string()),
        };
        let (next, _) = select_semester("T1", &current, "Sem1", &a);
        assert_eq!(next.subject_id.as_deref(), Some("SubjA"));
    }

    #[test]
    fn other_teachers_assignments_do_not_leak() {
        let a = fixture();
        assert!(!is_assigned("T1", "SubjC", "Sem1", &a));
        assert!(is_assigned("T2", "SubjC", "Sem1", &a));
    }
}
