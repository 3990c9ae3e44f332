//! Request payloads as they arrive from clients, and their validation into
//! the typed inputs the services work with.
//!
//! Text is trimmed before the `Validate` rules run, and every failure lands
//! in one [`FieldError`] list so a client gets all problems at once.

use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use validator::Validate;

use crate::{
    error::{ApiError, ApiResult, FieldError},
    models::{
        IssueCategory, IssueEdit, IssuePriority, IssueStatus, NewIssue, NewUser, ProfileEdit,
        Role, UnknownVariant,
    },
};

static PHONE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\d\s\-+()]+$").unwrap());

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// passwords are taken verbatim
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Collects derive rule failures together with the checks the derive can't
/// express: fields required only in some contexts and enum parsing.
#[derive(Default)]
struct Checker {
    errors: Vec<FieldError>,
}

impl Checker {
    fn fail(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    fn required<T>(&mut self, field: &str, message: &str, value: &Option<T>) {
        if value.is_none() {
            self.fail(field, message);
        }
    }

    fn fields(&mut self, form: &impl Validate) {
        if let Err(errors) = form.validate() {
            self.errors.extend(FieldError::from_validation(&errors));
        }
    }

    fn variant<T>(&mut self, field: &str, label: &str, value: Option<String>, required: bool) -> Option<T>
    where
        T: FromStr<Err = UnknownVariant>,
    {
        let Some(value) = trimmed(value) else {
            if required {
                self.fail(field, format!("{label} is required"));
            }
            return None;
        };
        match value.parse::<T>() {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                self.fail(field, format!("{label} {err}"));
                None
            },
        }
    }

    fn finish(mut self) -> ApiResult<()> {
        if self.errors.is_empty() {
            return Ok(());
        }
        self.errors.sort_by(|a, b| a.field.cmp(&b.field));
        Err(ApiError::validation(self.errors))
    }
}

/// Issue fields of a create or update request
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct IssueForm {
    #[validate(length(min = 5, max = 100, message = "Title must be between 5 and 100 characters"))]
    pub title: Option<String>,
    #[validate(length(
        min = 10,
        max = 1000,
        message = "Description must be between 10 and 1000 characters"
    ))]
    pub description: Option<String>,
    pub category: Option<String>,
    pub priority: Option<String>,
    #[validate(length(max = 200, message = "Location cannot exceed 200 characters"))]
    pub location: Option<String>,
}

impl IssueForm {
    fn normalized(self) -> IssueForm {
        IssueForm {
            title: trimmed(self.title),
            description: trimmed(self.description),
            category: trimmed(self.category),
            priority: trimmed(self.priority),
            location: trimmed(self.location),
        }
    }

    pub fn into_new_issue(self) -> ApiResult<NewIssue> {
        let form = self.normalized();
        let mut check = Checker::default();
        check.required("title", "Title is required", &form.title);
        check.required("description", "Description is required", &form.description);
        check.fields(&form);
        let category = check.variant::<IssueCategory>("category", "Category", form.category, true);
        let priority = check.variant::<IssuePriority>("priority", "Priority", form.priority, false);
        check.finish()?;

        match (form.title, form.description, category) {
            (Some(title), Some(description), Some(category)) => Ok(NewIssue {
                title,
                description,
                category,
                priority: priority.unwrap_or_default(),
                location: form.location,
            }),
            _ => Err(ApiError::bad_request("Validation failed")),
        }
    }

    pub fn into_edit(self) -> ApiResult<IssueEdit> {
        let form = self.normalized();
        let mut check = Checker::default();
        check.fields(&form);
        let category = check.variant("category", "Category", form.category, false);
        let priority = check.variant("priority", "Priority", form.priority, false);
        check.finish()?;
        Ok(IssueEdit {
            title: form.title,
            description: form.description,
            category,
            priority,
            location: form.location,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct StatusForm {
    pub status: Option<String>,
    #[validate(length(max = 500, message = "Remarks cannot exceed 500 characters"))]
    pub remarks: Option<String>,
}

impl StatusForm {
    pub fn into_change(self) -> ApiResult<(IssueStatus, Option<String>)> {
        let form = StatusForm {
            status: self.status,
            remarks: trimmed(self.remarks),
        };
        let mut check = Checker::default();
        check.fields(&form);
        let status = check.variant::<IssueStatus>("status", "Status", form.status, true);
        check.finish()?;
        status
            .map(|s| (s, form.remarks))
            .ok_or_else(|| ApiError::bad_request("Validation failed"))
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct RemarksForm {
    #[validate(length(max = 500, message = "Remarks cannot exceed 500 characters"))]
    pub remarks: Option<String>,
}

impl RemarksForm {
    pub fn required(self) -> ApiResult<String> {
        let form = RemarksForm {
            remarks: trimmed(self.remarks),
        };
        let mut check = Checker::default();
        check.required("remarks", "Remarks are required", &form.remarks);
        check.fields(&form);
        check.finish()?;
        form.remarks
            .ok_or_else(|| ApiError::bad_request("Validation failed"))
    }

    pub fn optional(self) -> ApiResult<Option<String>> {
        let form = RemarksForm {
            remarks: trimmed(self.remarks),
        };
        form.validate()?;
        Ok(form.remarks)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterForm {
    #[validate(
        required(message = "Name is required"),
        length(min = 2, max = 50, message = "Name must be between 2 and 50 characters")
    )]
    pub name: Option<String>,
    #[validate(
        required(message = "Email is required"),
        email(message = "Please provide a valid email")
    )]
    pub email: Option<String>,
    #[validate(
        required(message = "Password is required"),
        length(min = 6, message = "Password must be at least 6 characters")
    )]
    pub password: Option<String>,
    #[validate(length(max = 20, message = "Student ID cannot exceed 20 characters"))]
    pub student_id: Option<String>,
    #[validate(length(max = 100, message = "Department cannot exceed 100 characters"))]
    pub department: Option<String>,
    #[validate(
        length(max = 20, message = "Phone cannot exceed 20 characters"),
        regex(path = *PHONE, message = "Please provide a valid phone number")
    )]
    pub phone: Option<String>,
}

impl RegisterForm {
    pub fn into_new_user(self) -> ApiResult<NewUser> {
        let form = RegisterForm {
            name: trimmed(self.name),
            email: trimmed(self.email),
            password: non_empty(self.password),
            student_id: trimmed(self.student_id),
            department: trimmed(self.department),
            phone: trimmed(self.phone),
        };
        form.validate()?;

        match (form.name, form.email, form.password) {
            (Some(name), Some(email), Some(password)) => Ok(NewUser {
                name,
                email: email.to_lowercase(),
                password,
                student_id: form.student_id,
                department: form.department,
                phone: form.phone,
            }),
            _ => Err(ApiError::bad_request("Validation failed")),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct LoginForm {
    #[validate(
        required(message = "Email is required"),
        email(message = "Please provide a valid email")
    )]
    pub email: Option<String>,
    #[validate(required(message = "Password is required"))]
    pub password: Option<String>,
}

impl LoginForm {
    /// Lowercased email and the verbatim password
    pub fn into_credentials(self) -> ApiResult<(String, String)> {
        let form = LoginForm {
            email: trimmed(self.email),
            password: non_empty(self.password),
        };
        form.validate()?;
        form.email
            .map(|e| e.to_lowercase())
            .zip(form.password)
            .ok_or_else(|| ApiError::bad_request("Validation failed"))
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordForm {
    #[validate(required(message = "Current password is required"))]
    pub current_password: Option<String>,
    #[validate(
        required(message = "New password is required"),
        length(min = 6, message = "New password must be at least 6 characters")
    )]
    pub new_password: Option<String>,
}

impl ChangePasswordForm {
    pub fn into_passwords(self) -> ApiResult<(String, String)> {
        let form = ChangePasswordForm {
            current_password: non_empty(self.current_password),
            new_password: non_empty(self.new_password),
        };
        form.validate()?;
        form.current_password
            .zip(form.new_password)
            .ok_or_else(|| ApiError::bad_request("Validation failed"))
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProfileForm {
    #[validate(length(min = 2, max = 50, message = "Name must be between 2 and 50 characters"))]
    pub name: Option<String>,
    #[validate(
        length(max = 20, message = "Phone cannot exceed 20 characters"),
        regex(path = *PHONE, message = "Please provide a valid phone number")
    )]
    pub phone: Option<String>,
    #[validate(length(max = 100, message = "Department cannot exceed 100 characters"))]
    pub department: Option<String>,
    #[validate(length(max = 20, message = "Student ID cannot exceed 20 characters"))]
    pub student_id: Option<String>,
}

impl ProfileForm {
    pub fn into_edit(self) -> ApiResult<ProfileEdit> {
        let form = ProfileForm {
            name: trimmed(self.name),
            phone: trimmed(self.phone),
            department: trimmed(self.department),
            student_id: trimmed(self.student_id),
        };
        form.validate()?;
        Ok(ProfileEdit {
            name: form.name,
            phone: form.phone,
            department: form.department,
            student_id: form.student_id,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleForm {
    pub role: Option<String>,
}

impl RoleForm {
    pub fn into_role(self) -> ApiResult<Role> {
        let mut check = Checker::default();
        let role = check.variant::<Role>("role", "Role", self.role, true);
        check.finish()?;
        role.ok_or_else(|| ApiError::bad_request("Validation failed"))
    }
}

/// Parse an optional enum query parameter, reporting it against `field`
pub fn query_variant<T>(field: &str, label: &str, value: Option<String>) -> ApiResult<Option<T>>
where
    T: FromStr<Err = UnknownVariant>,
{
    let mut check = Checker::default();
    let parsed = check.variant(field, label, value, false);
    check.finish()?;
    Ok(parsed)
}
