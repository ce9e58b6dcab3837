// ABOUTME: Command implementations for the netsched CLI
// ABOUTME: Builds a network from arguments and handles the run and plan commands

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::args::{Args, NetworkArgs};
use super::config::Config;
use crate::engine::{
    filters, DependencyGrouper, ExecutionContext, ExecutionStrategy, RunReport, Scheduler,
    NO_ERROR,
};
use crate::network::{FnModule, ModuleId, Network, NetworkInterface};

/// Options for the run command that override configuration
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub strategy: Option<ExecutionStrategy>,
    pub max_concurrent: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub from: Option<String>,
    pub json: bool,
}

/// Build an in-memory network of simulated modules
///
/// Edge endpoints that were not declared with `--module` are added implicitly.
pub fn build_network(args: &NetworkArgs) -> Result<Arc<Network>> {
    let edges = args
        .edges
        .iter()
        .map(|edge| Args::parse_edge(edge))
        .collect::<Result<Vec<_>>>()?;

    let mut ids: Vec<String> = Vec::new();
    for id in args
        .modules
        .iter()
        .chain(edges.iter().flat_map(|(from, to)| [from, to]))
    {
        if !ids.contains(id) {
            ids.push(id.clone());
        }
    }

    for failing in &args.fail {
        if !ids.contains(failing) {
            return Err(anyhow::anyhow!("Unknown module in --fail: {}", failing));
        }
    }

    let network = Arc::new(Network::new());
    let work = Duration::from_millis(args.work_ms);

    for id in ids {
        let fails = args.fail.contains(&id);
        let label = id.clone();
        let module = FnModule::new(id, move || {
            if !work.is_zero() {
                std::thread::sleep(work);
            }
            if fails {
                Err(format!("{} was configured to fail", label))
            } else {
                Ok(())
            }
        });
        network.add_module(module.into_handle())?;
    }

    for (from, to) in edges {
        network.connect(from, to)?;
    }

    info!(
        "Built network with {} modules and {} connections",
        network.nmodules(),
        network.nconnections()
    );
    Ok(network)
}

/// Execute a network and print its report
pub async fn run_network(
    network_args: NetworkArgs,
    options: RunOptions,
    config: &Config,
) -> Result<()> {
    let network = build_network(&network_args)?;

    let mut scheduler_config = config.scheduler.to_scheduler_config();
    if let Some(strategy) = options.strategy {
        scheduler_config.strategy = strategy;
    }
    if options.max_concurrent.is_some() {
        scheduler_config.max_concurrent = options.max_concurrent;
    }
    let scheduler = Scheduler::new(scheduler_config);

    let mut context = ExecutionContext::for_network(network.clone());
    if let Some(start) = &options.from {
        let start = ModuleId::from(start.as_str());
        if network.module(&start).is_none() {
            return Err(anyhow::anyhow!("Unknown module in --from: {}", start));
        }
        context = context.with_filter(filters::downstream_of(network.as_ref(), &start));
    }

    info!("Running network with {} strategy", scheduler.config().strategy);
    let handle = scheduler.execute_with_cycle_check(context);
    let run_id = handle.run_id().to_string();

    let code = match options.timeout_secs.or(config.scheduler.timeout_secs) {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), handle.wait())
            .await
            .map_err(|_| anyhow::anyhow!("Run {} timed out after {}s", run_id, secs))??,
        None => handle.wait().await?,
    };

    let report = RunReport::collect(run_id, code, network.as_ref(), scheduler.thread_group());

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Run {} finished with code {}: {}",
            report.run_id, report.code, report.status
        );
        for module in &report.modules {
            match module.duration {
                Some(duration) => println!(
                    "  Module '{}': {} ({:?})",
                    module.module_id, module.state, duration
                ),
                None => println!("  Module '{}': {}", module.module_id, module.state),
            }
        }
        if report.summary.starved > 0 {
            println!(
                "  {} module(s) did not run because an upstream module errored",
                report.summary.starved
            );
        }
    }

    // Return error if the run failed to ensure proper exit code
    if code == NO_ERROR {
        Ok(())
    } else {
        Err(anyhow::anyhow!("Run finished with code {}", code))
    }
}

/// Print the dependency groups of a network
pub async fn plan_network(network_args: NetworkArgs, json: bool) -> Result<()> {
    let network = build_network(&network_args)?;
    let order = DependencyGrouper::new()
        .schedule(network.as_ref())
        .map_err(|e| anyhow::anyhow!("Network cannot be scheduled: {}", e))?;

    if json {
        let groups: Vec<Vec<&str>> = order
            .groups()
            .map(|(_, members)| members.iter().map(ModuleId::as_str).collect())
            .collect();
        println!("{}", serde_json::to_string_pretty(&groups)?);
        return Ok(());
    }

    println!(
        "Network: {} modules, {} groups, up to {} in parallel",
        network.module_count(),
        order.depth(),
        order.max_parallelism()
    );
    for (index, members) in order.groups() {
        let names: Vec<&str> = members.iter().map(ModuleId::as_str).collect();
        println!("  Group {}: {}", index, names.join(", "));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ExecutionState;

    fn network_args(modules: &[&str], edges: &[&str], fail: &[&str]) -> NetworkArgs {
        NetworkArgs {
            modules: modules.iter().map(|s| s.to_string()).collect(),
            edges: edges.iter().map(|s| s.to_string()).collect(),
            fail: fail.iter().map(|s| s.to_string()).collect(),
            work_ms: 0,
        }
    }

    #[test]
    fn test_build_network_adds_edge_endpoints() {
        let network = build_network(&network_args(&["solo"], &["a:b", "b:c"], &[])).unwrap();
        assert_eq!(network.nmodules(), 4);
        assert_eq!(network.nconnections(), 2);
    }

    #[test]
    fn test_build_network_rejects_unknown_failure() {
        assert!(build_network(&network_args(&["a"], &[], &["b"])).is_err());
        assert!(build_network(&network_args(&[], &["bad-edge"], &[])).is_err());
    }

    #[tokio::test]
    async fn test_run_network_reports_failure() {
        let result = run_network(
            network_args(&[], &["p:q"], &["p"]),
            RunOptions::default(),
            &Config::default(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_network_success() {
        let result = run_network(
            network_args(&["a", "b"], &["a:c", "b:c"], &[]),
            RunOptions {
                strategy: Some(ExecutionStrategy::Parallel),
                timeout_secs: Some(10),
                ..RunOptions::default()
            },
            &Config::default(),
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_failing_module_is_configured() {
        let network = build_network(&network_args(&["x"], &[], &["x"])).unwrap();
        let scheduler = Scheduler::default();
        let code = scheduler
            .execute(ExecutionContext::for_network(network.clone()))
            .wait()
            .await
            .unwrap();
        assert_eq!(code, 1);
        assert_eq!(
            network.module(&ModuleId::from("x")).unwrap().execution_state(),
            ExecutionState::Errored
        );
    }
}
