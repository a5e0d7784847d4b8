use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            _ => None,
        }
    }
}

/// Everything a signed-in user can ask the daemon to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ManageUsers,
    ViewUsers,
    ManageReferenceData,
    ViewReferenceData,
    ManageAssignments,
    ViewAssignments,
    EnterMarks,
    ViewMarks,
    DeleteMarks,
    ViewSummary,
    RequestAnalysis,
    ManageBackups,
}

const ADMIN_ACTIONS: &[Action] = &[
    Action::ManageUsers,
    Action::ViewUsers,
    Action::ManageReferenceData,
    Action::ViewReferenceData,
    Action::ManageAssignments,
    Action::ViewAssignments,
    Action::EnterMarks,
    Action::ViewMarks,
    Action::DeleteMarks,
    Action::ViewSummary,
    Action::ManageBackups,
];

const TEACHER_ACTIONS: &[Action] = &[
    Action::ViewUsers,
    Action::ViewReferenceData,
    Action::ViewAssignments,
    Action::EnterMarks,
    Action::ViewMarks,
];

const STUDENT_ACTIONS: &[Action] = &[
    Action::ViewReferenceData,
    Action::ViewMarks,
    Action::ViewSummary,
    Action::RequestAnalysis,
];

pub fn allowed_actions(role: Role) -> &'static [Action] {
    match role {
        Role::Admin => ADMIN_ACTIONS,
        Role::Teacher => TEACHER_ACTIONS,
        Role::Student => STUDENT_ACTIONS,
    }
}

pub fn is_allowed(role: Role, action: Action) -> bool {
    allowed_actions(role).contains(&action)
}

/// The signed-in user for the lifetime of a `session.begin` .. `session.end`
/// pair. Handlers receive it explicitly instead of reading global state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl Session {
    pub fn can(&self, action: Action) -> bool {
        is_allowed(self.role, action)
    }

    /// Students may only read their own records; other roles may name anyone.
    pub fn resolve_student_id(&self, requested: Option<&str>) -> Option<String> {
        match self.role {
            Role::Student => Some(self.user_id.clone()),
            _ => requested.map(|s| s.to_string()),
        }
    }

    /// Teachers are always scoped to themselves; admins may inspect any teacher.
    pub fn resolve_teacher_id(&self, requested: Option<&str>) -> Option<String> {
        match self.role {
            Role::Teacher => Some(self.user_id.clone()),
            Role::Admin => requested.map(|s| s.to_string()),
            Role::Student => None,
        }
    }
}
