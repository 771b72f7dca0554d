//! The built-in migration registry.

mod basic_contracts;
mod chainlink_l1;
mod config_price_feed;
mod mock_aggregators;
mod open_interest_caps;
mod real_chainlink;
mod upgrade_price_feeds;

use crate::chain::ChainClient;
use crate::migration::Migration;
use crate::settings::Layer;

/// Every known migration, in execution order.
///
/// Indices are stable once shipped: a retired migration leaves a gap (index
/// 5 here) rather than renumbering the ones after it, because deployed
/// stages store how far they got as a plain counter.
pub fn all<C: ChainClient>() -> Vec<Migration<C>> {
    vec![
        Migration {
            index: 0,
            name: "deploy-chainlink",
            layer: Layer::Layer1,
            tasks: chainlink_l1::tasks,
        },
        Migration {
            index: 1,
            name: "deploy-basic-contracts",
            layer: Layer::Layer1,
            tasks: basic_contracts::tasks,
        },
        Migration {
            index: 2,
            name: "config-price-feed",
            layer: Layer::Layer1,
            tasks: config_price_feed::tasks,
        },
        Migration {
            index: 3,
            name: "deploy-mock-aggregators",
            layer: Layer::Layer1,
            tasks: mock_aggregators::tasks,
        },
        Migration {
            index: 4,
            name: "upgrade-chainlink-and-price-feed",
            layer: Layer::Layer1,
            tasks: upgrade_price_feeds::tasks,
        },
        Migration {
            index: 6,
            name: "use-real-chainlink",
            layer: Layer::Layer1,
            tasks: real_chainlink::tasks,
        },
        Migration {
            index: 7,
            name: "set-open-interest-cap",
            layer: Layer::Layer1,
            tasks: open_interest_caps::tasks,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::chain::RpcClient;

    #[test]
    fn test_registry_order_and_gap() {
        let migrations = all::<RpcClient>();
        let indices: Vec<u32> = migrations.iter().map(|m| m.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 6, 7]);
        assert!(indices.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_registry_names_are_unique() {
        let migrations = all::<RpcClient>();
        let mut names: Vec<&str> = migrations.iter().map(|m| m.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), migrations.len());
    }
}
