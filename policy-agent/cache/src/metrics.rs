use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};

use crate::SharedRuleCache;

#[derive(Debug)]
struct Instrumented(SharedRuleCache);

pub fn register(reg: &mut Registry, cache: SharedRuleCache) {
    reg.register_collector(Box::new(Instrumented(cache)));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let this = self.0.read();

        let rules_encoder = encoder.encode_descriptor(
            "rule_index_size",
            "The number of rules in the cache",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(this.rule_count() as u32).encode(rules_encoder)?;

        let policies_encoder = encoder.encode_descriptor(
            "network_policy_index_size",
            "The number of network policies in the cache",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(this.policy_count() as u32).encode(policies_encoder)?;

        let address_groups_encoder = encoder.encode_descriptor(
            "address_group_index_size",
            "The number of address groups in the cache",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(this.address_group_count() as u32).encode(address_groups_encoder)?;

        let applied_to_groups_encoder = encoder.encode_descriptor(
            "applied_to_group_index_size",
            "The number of applied-to groups in the cache",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(this.applied_to_group_count() as u32).encode(applied_to_groups_encoder)?;

        Ok(())
    }
}
