//! Diffing desired against actual state and executing the resulting actions

use infra_core::{Action, ApplyResult, FailedAction, IntegrationError, Resource, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::integration::Integration;

/// How planning compares desired and actual resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffStrategy {
    /// Create missing ids, delete surplus ids
    #[default]
    IdOnly,
    /// Additionally update ids present on both sides whose configuration differs
    FieldLevel,
}

/// Id-set difference between actual and desired.
///
/// Creates come first in desired order, then deletes in actual order. A
/// repeated id only counts once.
pub fn diff_by_id(actual: &[Resource], desired: &[Resource]) -> Vec<Action> {
    let actual_ids: HashSet<&str> = actual.iter().map(|r| r.id.as_str()).collect();
    let desired_ids: HashSet<&str> = desired.iter().map(|r| r.id.as_str()).collect();

    let mut actions = Vec::new();

    let mut seen = HashSet::new();
    for resource in desired {
        if !actual_ids.contains(resource.id.as_str()) && seen.insert(resource.id.as_str()) {
            actions.push(Action::create(resource));
        }
    }

    let mut seen = HashSet::new();
    for resource in actual {
        if !desired_ids.contains(resource.id.as_str()) && seen.insert(resource.id.as_str()) {
            actions.push(Action::delete(resource));
        }
    }

    actions
}

/// [`diff_by_id`] plus an update for every shared id whose configuration changed.
///
/// Updates follow the creates and precede the deletes.
pub fn diff_with_updates(actual: &[Resource], desired: &[Resource]) -> Vec<Action> {
    let by_id: HashMap<&str, &Resource> = actual.iter().map(|r| (r.id.as_str(), r)).collect();

    let (deletes, creates): (Vec<Action>, Vec<Action>) = diff_by_id(actual, desired)
        .into_iter()
        .partition(|a| a.action_type == infra_core::ActionType::Delete);

    let mut seen = HashSet::new();
    let updates = desired.iter().filter_map(|wanted| {
        let current = by_id.get(wanted.id.as_str())?;
        if !seen.insert(wanted.id.as_str()) || current.configuration == wanted.configuration {
            return None;
        }
        Some(Action::update(wanted))
    });

    let mut actions = creates;
    actions.extend(updates);
    actions.extend(deletes);
    actions
}

/// Plan with an explicit strategy.
///
/// Field-level planning requires the integration to execute updates.
pub async fn plan_with_strategy<I>(
    integration: &I,
    desired: &[Resource],
    strategy: DiffStrategy,
) -> Result<Vec<Action>>
where
    I: Integration + ?Sized,
{
    match strategy {
        DiffStrategy::IdOnly => integration.plan(desired).await,
        DiffStrategy::FieldLevel => {
            if !integration.capabilities().supports_updates {
                return Err(IntegrationError::unsupported(format!(
                    "'{}' does not execute updates",
                    integration.identifier()
                )));
            }
            let actual = integration.get_actual_state().await?;
            Ok(diff_with_updates(&actual, desired))
        }
    }
}

/// Execute `actions` one at a time in list order.
///
/// A failed action is recorded and execution moves on to the next one.
pub async fn apply_sequential<I>(integration: &I, actions: Vec<Action>) -> ApplyResult
where
    I: Integration + ?Sized,
{
    let started = Instant::now();
    let total = actions.len();
    let mut result = ApplyResult::default();

    info!(
        "Applying {} action(s) on '{}'",
        total,
        integration.identifier()
    );

    for action in actions {
        debug!(action_id = %action.id, "{}", action.description);
        match integration.execute(&action).await {
            Ok(()) => {
                info!(action_id = %action.id, "✓ {}", action.description);
                result.successful.push(action);
            }
            Err(error) => {
                warn!(
                    action_id = %action.id,
                    code = error.code(),
                    "✗ {}: {}",
                    action.description,
                    error
                );
                result.failed.push(FailedAction { action, error });
            }
        }
    }

    result.duration = started.elapsed();
    result
        .metadata
        .insert("integration".into(), integration.identifier().to_string());
    result.metadata.insert("total".into(), total.to_string());
    result
        .metadata
        .insert("succeeded".into(), result.successful.len().to_string());
    result
        .metadata
        .insert("failed".into(), result.failed.len().to_string());

    info!(
        "Applied {} action(s) on '{}': {} succeeded, {} failed in {:?}",
        total,
        integration.identifier(),
        result.successful.len(),
        result.failed.len(),
        result.duration
    );

    result
}
