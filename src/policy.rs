use crate::errors::{AppError, AppResult};
use crate::models::{AppSettings, Privilege};
use crate::palette::parse_palette;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Browse,
    Plot,
    Export,
    AddData,
    AddColumn,
    Archive,
    ManageAccounts,
}

impl Action {
    pub const ALL: [Action; 7] = [
        Action::Browse,
        Action::Plot,
        Action::Export,
        Action::AddData,
        Action::AddColumn,
        Action::Archive,
        Action::ManageAccounts,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Browse => "browse",
            Self::Plot => "plot",
            Self::Export => "export",
            Self::AddData => "add-data",
            Self::AddColumn => "add-column",
            Self::Archive => "archive",
            Self::ManageAccounts => "manage-accounts",
        }
    }

    pub fn required_privilege(self) -> Privilege {
        match self {
            Self::Browse | Self::Plot | Self::Export => Privilege::ReadOnly,
            Self::AddData | Self::AddColumn | Self::Archive => Privilege::ReadAndWrite,
            Self::ManageAccounts => Privilege::Admin,
        }
    }
}

/// Gates session actions on the privilege tier inferred at login. The tier
/// comes from grant text, so the database still has the final word.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessPolicy;

impl AccessPolicy {
    pub fn new() -> Self {
        Self
    }

    pub fn check(&self, privilege: Option<Privilege>, action: Action) -> AppResult<()> {
        let required = action.required_privilege();
        match privilege {
            Some(current) if current >= required => Ok(()),
            Some(current) => Err(AppError::PermissionDenied(format!(
                "{} requires {} privilege, session has {}",
                action.as_str(),
                required.as_str(),
                current.as_str()
            ))),
            None => Err(AppError::PermissionDenied(format!(
                "{} requires a connected session",
                action.as_str()
            ))),
        }
    }

    pub fn allowed_actions(&self, privilege: Option<Privilege>) -> Vec<Action> {
        Action::ALL
            .into_iter()
            .filter(|action| self.check(privilege, *action).is_ok())
            .collect()
    }

    pub fn validate_settings(&self, settings: &AppSettings) -> AppResult<()> {
        parse_palette(&settings.palette)?;

        if let Some(command) = &settings.viewer_command {
            if command.trim().is_empty() {
                return Err(AppError::Validation("viewer command cannot be blank".to_string()));
            }
        }

        if let Some(directory) = &settings.export_directory {
            if !Path::new(directory).is_absolute() {
                return Err(AppError::Validation(format!(
                    "export directory {} must be an absolute path",
                    directory
                )));
            }
        }

        Ok(())
    }
}
