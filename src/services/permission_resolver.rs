//! Permission Resolver
//!
//! First defined value wins across:
//! 1. project profile movement override
//! 2. global profile movement override
//! 3. project profile default
//! 4. global profile default
//! 5. the movement's own `permission_mode`
//! 6. the movement's `required_permission_mode`
//!
//! Profiles are selected by the effective provider. With nothing defined,
//! `edit` movements get `edit` and others `readonly`. The result is then
//! raised, never lowered, to the required mode.

use crate::domain::models::{Movement, PermissionMode, ProviderKind, ProviderProfile, ProviderSettings};

pub fn resolve_permission(
    movement: &Movement,
    provider: ProviderKind,
    settings: &ProviderSettings,
) -> PermissionMode {
    let project = settings.project.provider_profiles.get(&provider);
    let global = settings.global.provider_profiles.get(&provider);
    let override_for = |profile: Option<&ProviderProfile>| {
        profile.and_then(|p| p.movement_permission_overrides.get(&movement.name).copied())
    };
    let default_for = |profile: Option<&ProviderProfile>| profile.and_then(|p| p.default_permission_mode);

    let resolved = override_for(project)
        .or_else(|| override_for(global))
        .or_else(|| default_for(project))
        .or_else(|| default_for(global))
        .or(movement.permission_mode)
        .or(movement.required_permission_mode)
        .unwrap_or(if movement.edit {
            PermissionMode::Edit
        } else {
            PermissionMode::Readonly
        });

    match movement.required_permission_mode {
        Some(floor) => resolved.at_least(floor),
        None => resolved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ProviderLayer;
    use std::collections::BTreeMap;

    fn profile(default: Option<PermissionMode>, overrides: &[(&str, PermissionMode)]) -> ProviderProfile {
        ProviderProfile {
            default_permission_mode: default,
            movement_permission_overrides: overrides
                .iter()
                .map(|(name, mode)| ((*name).to_string(), *mode))
                .collect(),
        }
    }

    fn settings(project: Option<ProviderProfile>, global: Option<ProviderProfile>) -> ProviderSettings {
        let layer = |p: Option<ProviderProfile>| ProviderLayer {
            provider_profiles: p
                .map(|p| BTreeMap::from([(ProviderKind::Claude, p)]))
                .unwrap_or_default(),
            ..Default::default()
        };
        ProviderSettings {
            project: layer(project),
            global: layer(global),
        }
    }

    #[test]
    fn test_override_precedence() {
        let movement = Movement::new("implement", "coder");
        let s = settings(
            Some(profile(Some(PermissionMode::Readonly), &[("implement", PermissionMode::Full)])),
            Some(profile(Some(PermissionMode::Edit), &[("implement", PermissionMode::Edit)])),
        );
        assert_eq!(resolve_permission(&movement, ProviderKind::Claude, &s), PermissionMode::Full);

        let s = settings(
            Some(profile(Some(PermissionMode::Readonly), &[])),
            Some(profile(None, &[("implement", PermissionMode::Edit)])),
        );
        assert_eq!(resolve_permission(&movement, ProviderKind::Claude, &s), PermissionMode::Edit);

        let s = settings(None, Some(profile(Some(PermissionMode::Full), &[])));
        assert_eq!(resolve_permission(&movement, ProviderKind::Claude, &s), PermissionMode::Full);
    }

    #[test]
    fn test_profile_selected_by_provider() {
        let movement = Movement::new("implement", "coder");
        let s = settings(Some(profile(Some(PermissionMode::Full), &[])), None);
        assert_eq!(
            resolve_permission(&movement, ProviderKind::Codex, &s),
            PermissionMode::Readonly
        );
    }

    #[test]
    fn test_required_mode_is_a_floor() {
        let movement = Movement::new("implement", "coder").with_required_permission(PermissionMode::Edit);
        let s = settings(
            Some(profile(Some(PermissionMode::Readonly), &[("implement", PermissionMode::Readonly)])),
            Some(profile(Some(PermissionMode::Readonly), &[])),
        );
        assert_eq!(resolve_permission(&movement, ProviderKind::Claude, &s), PermissionMode::Edit);

        let unconfigured = settings(None, None);
        assert_eq!(
            resolve_permission(&movement, ProviderKind::Claude, &unconfigured),
            PermissionMode::Edit
        );
    }

    #[test]
    fn test_fallbacks() {
        let s = settings(None, None);
        let readonly = Movement::new("plan", "planner");
        assert_eq!(resolve_permission(&readonly, ProviderKind::Claude, &s), PermissionMode::Readonly);

        let edit = Movement::new("implement", "coder").with_edit(true);
        assert_eq!(resolve_permission(&edit, ProviderKind::Claude, &s), PermissionMode::Edit);

        let mut explicit = Movement::new("implement", "coder");
        explicit.permission_mode = Some(PermissionMode::Full);
        assert_eq!(resolve_permission(&explicit, ProviderKind::Claude, &s), PermissionMode::Full);
    }
}
