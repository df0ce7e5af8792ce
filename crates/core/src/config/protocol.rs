//! Protocol contract addresses and the mainnet deployment preset.

use alloy::primitives::{address, b256, Address, B256};
use keeper_chain::{event_signatures, ProtocolAddresses};
use serde::{Deserialize, Serialize};

/// A vault manager and its active block range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultManagerConfig {
    pub address: Address,
    /// Trigger contract for positions opened through this manager.
    #[serde(default)]
    pub liquidation_trigger: Option<Address>,
    pub from_block: u64,
    /// Last block the manager was in use; `None` while active.
    #[serde(default)]
    pub to_block: Option<u64>,
}

impl VaultManagerConfig {
    pub fn is_active(&self) -> bool {
        self.to_block.is_none()
    }
}

/// A contract whose logs are synchronized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedContract {
    pub address: Address,
    pub topics: Vec<B256>,
    pub from_block: u64,
    pub to_block: Option<u64>,
}

impl TrackedContract {
    /// Clamp `[from, to]` to this contract's active range.
    pub fn clamp(&self, from: u64, to: u64) -> Option<(u64, u64)> {
        let from = from.max(self.from_block);
        let to = match self.to_block {
            Some(end) => to.min(end),
            None => to,
        };
        (from <= to).then_some((from, to))
    }
}

/// Protocol contract addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsConfig {
    pub vault: Address,

    /// Registry of open positions; without it positions are reconstructed from logs
    #[serde(default)]
    pub cdp_registry: Option<Address>,

    #[serde(default)]
    pub oracle_registry: Option<Address>,

    #[serde(default)]
    pub vault_manager_parameters: Option<Address>,

    /// Chainlink ETH/USD feed used by the fallback price pre-check
    #[serde(default)]
    pub eth_usd_aggregator: Option<Address>,

    /// Trigger for fallback-oracle collateral
    #[serde(default)]
    pub keydonix_trigger: Option<Address>,

    /// Trigger for fallback-oracle LP token collateral
    #[serde(default)]
    pub keydonix_lp_trigger: Option<Address>,

    /// Auction contract emitting `Buyout`
    #[serde(default)]
    pub liquidation_auction: Option<Address>,

    #[serde(default)]
    pub auction_from_block: u64,

    #[serde(default)]
    pub vault_managers: Vec<VaultManagerConfig>,
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self::mainnet()
    }
}

impl ContractsConfig {
    /// Ethereum mainnet deployment.
    pub fn mainnet() -> Self {
        let trigger_a = address!("989AC9c8353C3F01412705d7E50B4Ab9E804c227");
        let trigger_b = address!("0ca1A59a987922375234df94919A456F61e93E1e");

        Self {
            vault: address!("b1cff81b9305166ff1efc49a129ad2afcd7bcf19"),
            cdp_registry: None,
            oracle_registry: None,
            vault_manager_parameters: None,
            eth_usd_aggregator: Some(address!("5f4eC3Df9cbd43714FE2740f5E3616155c5b8419")),
            keydonix_trigger: None,
            keydonix_lp_trigger: None,
            liquidation_auction: None,
            auction_from_block: 0,
            vault_managers: vec![
                VaultManagerConfig {
                    address: address!("7f50d78062304B6f523f20E9bACa8F3C72197424"),
                    liquidation_trigger: Some(trigger_a),
                    from_block: 11_316_117,
                    to_block: Some(11_351_816),
                },
                VaultManagerConfig {
                    address: address!("78727A77028d9130D2772713d570780231E64ECf"),
                    liquidation_trigger: Some(trigger_a),
                    from_block: 11_354_460,
                    to_block: Some(11_378_571),
                },
                VaultManagerConfig {
                    address: address!("754106b2f312c987Dd34161F8b4735392fa93F06"),
                    liquidation_trigger: Some(trigger_b),
                    from_block: 11_320_948,
                    to_block: Some(11_329_829),
                },
                VaultManagerConfig {
                    address: address!("211a6d4d4f49c0c5814451589d6378fda614adb9"),
                    liquidation_trigger: Some(trigger_a),
                    from_block: 11_373_662,
                    to_block: None,
                },
                VaultManagerConfig {
                    address: address!("3052764f1af2f8B7a887dEAfA42153530676079B"),
                    liquidation_trigger: Some(trigger_b),
                    from_block: 11_373_663,
                    to_block: None,
                },
                // Standard managers have no trigger of their own
                VaultManagerConfig {
                    address: address!("56DD677842214CbB97Ad88dBAA58DD55e1b179Ea"),
                    liquidation_trigger: None,
                    from_block: 11_420_394,
                    to_block: None,
                },
                VaultManagerConfig {
                    address: address!("2726ebDf958cC15f5adB01aAd22741329948fbDB"),
                    liquidation_trigger: None,
                    from_block: 11_316_092,
                    to_block: None,
                },
            ],
        }
    }

    /// Trigger of the manager at `manager`, falling back to the default trigger.
    pub fn trigger_for_manager(&self, manager: Address) -> Option<Address> {
        self.vault_managers
            .iter()
            .find(|m| m.address == manager)
            .and_then(|m| m.liquidation_trigger)
            .or_else(|| self.default_trigger())
    }

    /// Trigger of the most recent active manager that has one.
    pub fn default_trigger(&self) -> Option<Address> {
        self.vault_managers
            .iter()
            .filter(|m| m.is_active())
            .filter_map(|m| m.liquidation_trigger.map(|t| (m.from_block, t)))
            .max_by_key(|(from, _)| *from)
            .map(|(_, t)| t)
    }

    /// Every contract whose logs are synchronized, with its topics and range.
    pub fn tracked_contracts(&self) -> Vec<TrackedContract> {
        let mut tracked: Vec<TrackedContract> = self
            .vault_managers
            .iter()
            .map(|m| TrackedContract {
                address: m.address,
                topics: event_signatures::vault_manager_topics(),
                from_block: m.from_block,
                to_block: m.to_block,
            })
            .collect();

        // Triggers are shared between managers; track each once from its earliest use
        let mut triggers: Vec<(Address, u64, Option<u64>)> = Vec::new();
        for manager in &self.vault_managers {
            let Some(trigger) = manager.liquidation_trigger else {
                continue;
            };
            match triggers.iter_mut().find(|(a, _, _)| *a == trigger) {
                Some(entry) => {
                    entry.1 = entry.1.min(manager.from_block);
                    entry.2 = match (entry.2, manager.to_block) {
                        (Some(a), Some(b)) => Some(a.max(b)),
                        _ => None,
                    };
                }
                None => triggers.push((trigger, manager.from_block, manager.to_block)),
            }
        }
        let keydonix_from = self.vault_managers.iter().map(|m| m.from_block).min().unwrap_or(0);
        for trigger in [self.keydonix_trigger, self.keydonix_lp_trigger].into_iter().flatten() {
            if !triggers.iter().any(|(a, _, _)| *a == trigger) {
                triggers.push((trigger, keydonix_from, None));
            }
        }
        tracked.extend(triggers.into_iter().map(|(address, from_block, to_block)| {
            TrackedContract {
                address,
                topics: vec![event_signatures::LIQUIDATION_TRIGGERED],
                from_block,
                to_block,
            }
        }));

        if let Some(auction) = self.liquidation_auction {
            tracked.push(TrackedContract {
                address: auction,
                topics: vec![event_signatures::BUYOUT],
                from_block: self.auction_from_block,
                to_block: None,
            });
        }

        tracked
    }

    pub fn protocol_addresses(&self) -> ProtocolAddresses {
        ProtocolAddresses {
            vault: self.vault,
            cdp_registry: self.cdp_registry,
            oracle_registry: self.oracle_registry,
            vault_manager_parameters: self.vault_manager_parameters,
            eth_usd_aggregator: self.eth_usd_aggregator,
        }
    }
}

/// A constant-product AMM factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DexConfig {
    pub factory: Address,
    pub init_code_hash: B256,
}

/// Fallback oracle proof parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofConfig {
    /// Blocks between the proven state and the trigger block
    #[serde(default = "default_lookback_blocks")]
    pub lookback_blocks: u64,

    #[serde(default = "default_weth")]
    pub weth: Address,

    #[serde(default = "default_uniswap")]
    pub uniswap: DexConfig,

    #[serde(default = "default_sushiswap")]
    pub sushiswap: DexConfig,

    #[serde(default = "default_shibaswap")]
    pub shibaswap: DexConfig,
}

fn default_lookback_blocks() -> u64 {
    119
}
fn default_weth() -> Address {
    address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2")
}
fn default_uniswap() -> DexConfig {
    DexConfig {
        factory: address!("5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f"),
        init_code_hash: b256!("96e8ac4277198ff8b6f785478aa9a39f403cb768dd02cbee326c3e7da348845f"),
    }
}
fn default_sushiswap() -> DexConfig {
    DexConfig {
        factory: address!("C0AEe478e3658e2610c5F7A4A2E1777cE9e4f2Ac"),
        init_code_hash: b256!("e18a34eb0e04b04f7a0ac29a6e80748dca96319b42c54d679cb821dca90c6303"),
    }
}
fn default_shibaswap() -> DexConfig {
    DexConfig {
        factory: address!("115934131916C8b277DD010Ee02de363c09d037c"),
        init_code_hash: b256!("65d1a3b1e46c6e4f1be1ad5f99ef14dc488ae0549dc97db9b30afe2241ce1c7a"),
    }
}

impl Default for ProofConfig {
    fn default() -> Self {
        Self {
            lookback_blocks: default_lookback_blocks(),
            weth: default_weth(),
            uniswap: default_uniswap(),
            sushiswap: default_sushiswap(),
            shibaswap: default_shibaswap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_trigger_is_latest_active() {
        let contracts = ContractsConfig::mainnet();
        assert_eq!(
            contracts.default_trigger(),
            Some(address!("0ca1A59a987922375234df94919A456F61e93E1e"))
        );
        assert_eq!(
            contracts.trigger_for_manager(address!("7f50d78062304B6f523f20E9bACa8F3C72197424")),
            Some(address!("989AC9c8353C3F01412705d7E50B4Ab9E804c227"))
        );
    }

    #[test]
    fn test_tracked_contracts_dedupe_triggers() {
        let contracts = ContractsConfig::mainnet();
        let tracked = contracts.tracked_contracts();

        // 7 managers + 2 distinct triggers
        assert_eq!(tracked.len(), 9);

        let trigger_a = tracked
            .iter()
            .find(|t| t.address == address!("989AC9c8353C3F01412705d7E50B4Ab9E804c227"))
            .unwrap();
        assert_eq!(trigger_a.from_block, 11_316_117);
        // One of its managers is still active
        assert_eq!(trigger_a.to_block, None);
    }

    #[test]
    fn test_clamp_range() {
        let contract = TrackedContract {
            address: Address::ZERO,
            topics: vec![],
            from_block: 100,
            to_block: Some(200),
        };
        assert_eq!(contract.clamp(50, 150), Some((100, 150)));
        assert_eq!(contract.clamp(150, 300), Some((150, 200)));
        assert_eq!(contract.clamp(201, 300), None);
    }
}
