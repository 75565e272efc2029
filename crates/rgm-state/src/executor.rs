//! The tree executor: walks a resource-group tree invoking
//! the resource agent for `start`, `stop`, `status`, and the conditional
//! variants used during reconfiguration.

use std::future::Future;
use std::pin::Pin;

use rgm_core::GroupName;
use rgm_error::RgmError;
use rgm_forest::{Resource, ResourceKey, ResourceNode};

use crate::ports::{AgentAction, AgentInvoker, OcfCode};

async fn invoke_require_success(
    agent: &dyn AgentInvoker,
    group: &GroupName,
    resource: &Resource,
    action: AgentAction,
) -> Result<(), RgmError> {
    let code = agent.invoke(&resource.rule_name, action, &resource.attrs).await?;
    if code.is_success() {
        Ok(())
    } else {
        Err(agent_failure(group, resource, action, code))
    }
}

async fn stop_one(agent: &dyn AgentInvoker, group: &GroupName, resource: &Resource) -> Result<(), RgmError> {
    let code = agent.invoke(&resource.rule_name, AgentAction::Stop, &resource.attrs).await?;
    if code.is_stop_benign() {
        Ok(())
    } else {
        Err(agent_failure(group, resource, AgentAction::Stop, code))
    }
}

fn agent_failure(group: &GroupName, resource: &Resource, action: AgentAction, code: OcfCode) -> RgmError {
    RgmError::AgentFailure {
        group: group.clone(),
        message: format!("{action:?} on resource type '{}' returned {code:?}", resource.rule_name),
    }
}

/// Starts `node` and its whole subtree, pre-order (parent before
/// children), children in rule-declared order.
///
/// On a child's failure, already-started siblings of that child and the
/// subtree root itself are stopped as a compensating action, and the
/// original failure is returned.
pub fn start_tree<'a>(
    node: &'a ResourceNode,
    group: &'a GroupName,
    resources: &'a [Resource],
    agent: &'a dyn AgentInvoker,
) -> Pin<Box<dyn Future<Output = Result<(), RgmError>> + Send + 'a>> {
    Box::pin(async move {
        let resource = &resources[node.resource];
        invoke_require_success(agent, group, resource, AgentAction::Start).await?;

        let mut started = Vec::new();
        for child in &node.children {
            match start_tree(child, group, resources, agent).await {
                Ok(()) => started.push(child),
                Err(err) => {
                    for sibling in started.into_iter().rev() {
                        if let Err(compensating_err) = stop_tree(sibling, group, resources, agent).await {
                            tracing::warn!(group = %group, error = %compensating_err, "compensating stop failed");
                        }
                    }
                    if let Err(compensating_err) = stop_one(agent, group, resource).await {
                        tracing::warn!(group = %group, error = %compensating_err, "compensating stop of subtree root failed");
                    }
                    return Err(err);
                }
            }
        }

        Ok(())
    })
}

/// Stops `node` and its whole subtree, post-order (children before
/// parent — the reverse of start order).
///
/// A child's hard failure still lets remaining siblings be attempted, but
/// the first hard failure observed anywhere in the subtree is what the
/// walk ultimately returns.
pub fn stop_tree<'a>(
    node: &'a ResourceNode,
    group: &'a GroupName,
    resources: &'a [Resource],
    agent: &'a dyn AgentInvoker,
) -> Pin<Box<dyn Future<Output = Result<(), RgmError>> + Send + 'a>> {
    Box::pin(async move {
        let mut first_error = None;
        for child in &node.children {
            if let Err(err) = stop_tree(child, group, resources, agent).await {
                first_error.get_or_insert(err);
            }
        }

        let resource = &resources[node.resource];
        if let Err(err) = stop_one(agent, group, resource).await {
            first_error.get_or_insert(err);
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    })
}

/// Checks `status` pre-order, stopping at the first resource that is not
/// `Success`.
pub async fn status_tree(
    node: &ResourceNode,
    group: &GroupName,
    resources: &[Resource],
    agent: &dyn AgentInvoker,
) -> Result<(), RgmError> {
    for visited in node.walk() {
        let resource = &resources[visited.resource];
        invoke_require_success(agent, group, resource, AgentAction::Status).await?;
    }
    Ok(())
}

/// Starts only the resources under `node` whose [`rgm_forest::ResourceFlags::needstart`]
/// flag is set, in pre-order.
pub async fn conditional_start(
    node: &ResourceNode,
    group: &GroupName,
    resources: &[Resource],
    agent: &dyn AgentInvoker,
) -> Result<(), RgmError> {
    for visited in node.walk() {
        let resource = &resources[visited.resource];
        if resource.flags.needstart {
            invoke_require_success(agent, group, resource, AgentAction::Start).await?;
        }
    }
    Ok(())
}

/// Stops only the resources under `node` whose [`rgm_forest::ResourceFlags::needstop`]
/// flag is set, in post-order.
pub async fn conditional_stop(
    node: &ResourceNode,
    group: &GroupName,
    resources: &[Resource],
    agent: &dyn AgentInvoker,
) -> Result<(), RgmError> {
    let mut keys = Vec::new();
    collect_postorder(node, &mut keys);

    for key in keys {
        let resource = &resources[key];
        if resource.flags.needstop {
            stop_one(agent, group, resource).await?;
        }
    }
    Ok(())
}

fn collect_postorder(node: &ResourceNode, out: &mut Vec<ResourceKey>) {
    for child in &node.children {
        collect_postorder(child, out);
    }
    out.push(node.resource);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::test_double::ScriptedAgent;
    use rgm_forest::{Resource, ResourceFlags, Rule};

    fn rules() -> Vec<Rule> {
        vec![
            Rule {
                type_name: "service".into(),
                required_attrs: vec!["name".into()],
                optional_attrs: vec![],
                child_types_in_order: vec!["ip".into(), "script".into()],
                is_root: true,
            },
            Rule {
                type_name: "ip".into(),
                required_attrs: vec!["address".into()],
                optional_attrs: vec![],
                child_types_in_order: vec![],
                is_root: false,
            },
            Rule {
                type_name: "script".into(),
                required_attrs: vec!["file".into()],
                optional_attrs: vec![],
                child_types_in_order: vec![],
                is_root: false,
            },
        ]
    }

    fn tree() -> (Vec<Resource>, ResourceNode) {
        let resources = vec![
            Resource {
                rule_name: "service".into(),
                attrs: vec![("name".into(), "web".into())],
                parent: None,
                flags: ResourceFlags::default(),
            },
            Resource {
                rule_name: "ip".into(),
                attrs: vec![("address".into(), "10.0.0.5".into())],
                parent: Some(0),
                flags: ResourceFlags::default(),
            },
            Resource {
                rule_name: "script".into(),
                attrs: vec![("file".into(), "/etc/init.d/web".into())],
                parent: Some(0),
                flags: ResourceFlags::default(),
            },
        ];
        let roots = rgm_forest::build_tree(&rules(), &resources).unwrap();
        (resources, roots.into_iter().next().unwrap())
    }

    #[tokio::test]
    async fn start_walks_preorder_children_in_rule_order() {
        let (resources, root) = tree();
        let agent = ScriptedAgent::new();
        // Ordering itself is proven by the tree builder's own tests; here we
        // just confirm a clean tree starts without error end to end.
        let group = GroupName::new("web");
        let result = start_tree(&root, &group, &resources, &agent).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn start_failure_compensates_started_siblings() {
        let (resources, root) = tree();
        let agent = ScriptedAgent::new();
        agent.script("script", AgentAction::Start, OcfCode::GenericError);
        let group = GroupName::new("web");

        let result = start_tree(&root, &group, &resources, &agent).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn stop_tolerates_not_installed_as_benign() {
        let (resources, root) = tree();
        let agent = ScriptedAgent::new();
        agent.script("ip", AgentAction::Stop, OcfCode::NotInstalled);
        let group = GroupName::new("web");

        let result = stop_tree(&root, &group, &resources, &agent).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn status_fails_on_first_bad_resource() {
        let (resources, root) = tree();
        let agent = ScriptedAgent::new();
        agent.script("ip", AgentAction::Status, OcfCode::GenericError);
        let group = GroupName::new("web");

        let result = status_tree(&root, &group, &resources, &agent).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn conditional_start_only_touches_flagged_resources() {
        let (mut resources, _) = tree();
        resources[1].flags.needstart = true;
        let root = rgm_forest::build_tree(&rules(), &resources).unwrap().into_iter().next().unwrap();

        let agent = ScriptedAgent::new();
        agent.script("service", AgentAction::Start, OcfCode::GenericError);
        let group = GroupName::new("web");

        // The root is not flagged, so its scripted failure must never be hit.
        let result = conditional_start(&root, &group, &resources, &agent).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn conditional_stop_only_touches_flagged_resources() {
        let (mut resources, _) = tree();
        resources[2].flags.needstop = true;
        let root = rgm_forest::build_tree(&rules(), &resources).unwrap().into_iter().next().unwrap();

        let agent = ScriptedAgent::new();
        agent.script("service", AgentAction::Stop, OcfCode::GenericError);
        let group = GroupName::new("web");

        let result = conditional_stop(&root, &group, &resources, &agent).await;
        assert!(result.is_ok());
    }
}
