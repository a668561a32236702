mod routing_rule;

pub use routing_rule::{
    RoutingRule,
    create_routing_rule,
    get_routing_rule_by_id,
    list_active_routing_rules,
    set_routing_rule_active,
};
