//! Provider/Model Resolver
//!
//! Provider and model are resolved independently; for each, the first
//! defined value wins across:
//! 1. CLI override
//! 2. persona-level entry (`persona_providers`)
//! 3. movement declaration
//! 4. project config
//! 5. global config

use crate::domain::models::{Movement, ProviderKind, ProviderSettings};

/// Values given on the command line for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    pub provider: Option<ProviderKind>,
    pub model: Option<String>,
}

/// Effective provider and model for one movement turn.
///
/// `movement_provider`/`movement_model` always carry the movement's own
/// declaration so session keys stay stable when an override is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProvider {
    pub provider: ProviderKind,
    pub model: Option<String>,
    pub movement_provider: Option<ProviderKind>,
    pub movement_model: Option<String>,
}

pub fn resolve_provider(
    movement: &Movement,
    cli: &CliOverrides,
    settings: &ProviderSettings,
) -> ResolvedProvider {
    let persona = settings.persona_entry(&movement.persona);

    let provider = cli
        .provider
        .or_else(|| persona.and_then(|p| p.provider))
        .or(movement.provider)
        .or(settings.project.provider)
        .or(settings.global.provider)
        .unwrap_or_default();

    let model = cli
        .model
        .clone()
        .or_else(|| persona.and_then(|p| p.model.clone()))
        .or_else(|| movement.model.clone())
        .or_else(|| settings.project.model.clone())
        .or_else(|| settings.global.model.clone());

    ResolvedProvider {
        provider,
        model,
        movement_provider: movement.provider,
        movement_model: movement.model.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{PersonaProviderEntry, ProviderLayer};

    fn layer(provider: ProviderKind, model: &str) -> ProviderLayer {
        ProviderLayer {
            provider: Some(provider),
            model: Some(model.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_cli_wins_and_movement_fields_kept() {
        let movement =
            Movement::new("plan", "planner").with_provider(ProviderKind::Claude, Some("claude-movement"));
        let cli = CliOverrides {
            provider: Some(ProviderKind::Codex),
            model: Some("cli-model".to_string()),
        };
        let resolved = resolve_provider(&movement, &cli, &ProviderSettings::default());

        assert_eq!(resolved.provider, ProviderKind::Codex);
        assert_eq!(resolved.model.as_deref(), Some("cli-model"));
        assert_eq!(resolved.movement_provider, Some(ProviderKind::Claude));
        assert_eq!(resolved.movement_model.as_deref(), Some("claude-movement"));
    }

    #[test]
    fn test_precedence_tiers() {
        let mut settings = ProviderSettings {
            project: layer(ProviderKind::Codex, "project-model"),
            global: layer(ProviderKind::Mock, "global-model"),
        };
        let plain = Movement::new("plan", "planner");
        let cli = CliOverrides::default();

        let resolved = resolve_provider(&plain, &cli, &settings);
        assert_eq!(resolved.provider, ProviderKind::Codex);
        assert_eq!(resolved.model.as_deref(), Some("project-model"));

        let with_movement = plain.clone().with_provider(ProviderKind::Claude, Some("movement-model"));
        let resolved = resolve_provider(&with_movement, &cli, &settings);
        assert_eq!(resolved.provider, ProviderKind::Claude);
        assert_eq!(resolved.model.as_deref(), Some("movement-model"));

        settings.global.persona_providers.insert(
            "planner".to_string(),
            PersonaProviderEntry {
                provider: Some(ProviderKind::Mock),
                model: None,
            },
        );
        let resolved = resolve_provider(&with_movement, &cli, &settings);
        assert_eq!(resolved.provider, ProviderKind::Mock);
        // model resolves independently of provider
        assert_eq!(resolved.model.as_deref(), Some("movement-model"));
    }

    #[test]
    fn test_global_and_default() {
        let settings = ProviderSettings {
            project: ProviderLayer::default(),
            global: layer(ProviderKind::Codex, "global-model"),
        };
        let movement = Movement::new("plan", "planner");
        let resolved = resolve_provider(&movement, &CliOverrides::default(), &settings);
        assert_eq!(resolved.provider, ProviderKind::Codex);

        let resolved =
            resolve_provider(&movement, &CliOverrides::default(), &ProviderSettings::default());
        assert_eq!(resolved.provider, ProviderKind::Claude);
        assert!(resolved.model.is_none());
    }
}
