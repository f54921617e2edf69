//!
//! Metric catalog
//!
//! Static tables mapping each exported metric name to the snapshot attribute it reads. Each
//! [`Family`] describes one kind of snapshot (one table of statistics on the managed resource)
//! and is polled by its own [`Probe`](crate::Probe). Adding a tracked statistic only means adding
//! a line to one of these tables.
//!
use crate::registry::GaugeDef;

///
/// Maps one exported metric to the source attribute it republishes
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub metric: &'static str,
    pub attribute: &'static str,
    pub help: &'static str,
}

///
/// A statistic family: one kind of snapshot and the metrics tracked from its rows
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Family {
    /// Name used in configuration and logs
    pub name: &'static str,
    /// Attribute identifying the entity each row describes
    pub identity: &'static str,
    /// Label attached to every published data point, carrying the entity id
    pub entity_label: &'static str,
    /// Resource path a remote source appends to its base URL
    pub resource: &'static str,
    pub entries: &'static [CatalogEntry],
}

impl Family {
    pub const ALL: &'static [&'static Family] = &[
        &PROCESS_DEFINITIONS,
        &SERVER_INFO,
        &QUEUE_INFO,
        &TOPIC_INFO,
        &DURABLE_INFO,
    ];

    pub fn by_name(name: &str) -> Option<&'static Family> {
        Self::ALL.iter().copied().find(|f| f.name == name)
    }

    ///
    /// Builds the gauge definition published for `entry`
    ///
    pub fn gauge(&self, entry: &CatalogEntry) -> GaugeDef {
        GaugeDef::new(entry.metric, entry.help, self.entity_label)
    }
}

macro_rules! entries {
    ($($metric:literal <= $attribute:literal : $help:literal),* $(,)?) => {
        &[$(CatalogEntry { metric: $metric, attribute: $attribute, help: $help }),*]
    };
}

pub const PROCESS_DEFINITIONS: Family = Family {
    name: "process_definitions",
    identity: "Name",
    entity_label: "process",
    resource: "processdefinitions",
    entries: entries![
        "bwengine.processdefinition.created" <= "Created":
            "Number of processes created for this process definition",
        "bwengine.processdefinition.suspended" <= "Suspended":
            "Number of times processes using this process definition have been suspended",
        "bwengine.processdefinition.swapped" <= "Swapped": "Number of times swapped",
        "bwengine.processdefinition.queued" <= "Queued": "Number of times queued",
        "bwengine.processdefinition.aborted" <= "Aborted": "Number of times aborted",
        "bwengine.processdefinition.completed" <= "Completed": "Number of times completed",
        "bwengine.processdefinition.checkpointed" <= "Checkpointed":
            "Number of times checkpointed",
        "bwengine.processdefinition.execution_total" <= "TotalExecution":
            "Total execution time of all completed processes (milliseconds)",
        "bwengine.processdefinition.execution_avg" <= "AverageExecution":
            "Average execution time of all completed processes (milliseconds)",
        "bwengine.processdefinition.elapsed_total" <= "TotalElapsed":
            "Total elapsed time of all completed processes (milliseconds)",
        "bwengine.processdefinition.elapsed_avg" <= "AverageElapsed":
            "Average elapsed time of all completed processes (milliseconds)",
        "bwengine.processdefinition.elapsed_min" <= "MinElapsed":
            "Minimum elapsed time of all completed processes (milliseconds)",
        "bwengine.processdefinition.elapsed_max" <= "MaxElapsed":
            "Maximum elapsed time of all completed processes (milliseconds)",
        "bwengine.processdefinition.execution_min" <= "MinExecution":
            "Minimum execution time of all completed processes (milliseconds)",
        "bwengine.processdefinition.execution_max" <= "MaxExecution":
            "Maximum execution time of all completed processes (milliseconds)",
        "bwengine.processdefinition.execution_recent" <= "MostRecentExecutionTime":
            "Most recent execution time (milliseconds)",
        "bwengine.processdefinition.elapsed_recent" <= "MostRecentElapsedTime":
            "Most recent elapsed time (milliseconds)",
    ],
};

pub const SERVER_INFO: Family = Family {
    name: "server_info",
    identity: "ServerName",
    entity_label: "server",
    resource: "serverinfo",
    entries: entries![
        "ems.server.connections" <= "ConnectionCount": "Client connections",
        "ems.server.sessions" <= "SessionCount": "Open sessions",
        "ems.server.producers" <= "ProducerCount": "Message producers",
        "ems.server.consumers" <= "ConsumerCount": "Message consumers",
        "ems.server.queues" <= "QueueCount": "Queues",
        "ems.server.topics" <= "TopicCount": "Topics",
        "ems.server.durables" <= "DurableCount": "Durable subscribers",
        "ems.server.pending_messages" <= "PendingMessageCount": "Pending messages",
        "ems.server.pending_bytes" <= "PendingMessageSize": "Pending message bytes",
        "ems.server.inbound_messages" <= "InboundMessageCount": "Messages received",
        "ems.server.outbound_messages" <= "OutboundMessageCount": "Messages sent",
        "ems.server.inbound_rate" <= "InboundMessageRate": "Messages received per second",
        "ems.server.outbound_rate" <= "OutboundMessageRate": "Messages sent per second",
        "ems.server.message_memory_bytes" <= "MsgMem": "Memory used by messages",
    ],
};

pub const QUEUE_INFO: Family = Family {
    name: "queue_info",
    identity: "QueueName",
    entity_label: "queue",
    resource: "queueinfo",
    entries: entries![
        "ems.queue.pending_messages" <= "PendingMessageCount": "Pending messages",
        "ems.queue.pending_bytes" <= "PendingMessageSize": "Pending message bytes",
        "ems.queue.consumers" <= "ConsumerCount": "Consumers",
        "ems.queue.receivers" <= "ReceiverCount": "Receivers",
        "ems.queue.in_transit_messages" <= "InTransitMessageCount": "Messages in transit",
        "ems.queue.inbound_messages" <= "InboundTotalMessages": "Messages received",
        "ems.queue.outbound_messages" <= "OutboundTotalMessages": "Messages delivered",
    ],
};

pub const TOPIC_INFO: Family = Family {
    name: "topic_info",
    identity: "TopicName",
    entity_label: "topic",
    resource: "topicinfo",
    entries: entries![
        "ems.topic.pending_messages" <= "PendingMessageCount": "Pending messages",
        "ems.topic.pending_bytes" <= "PendingMessageSize": "Pending message bytes",
        "ems.topic.subscribers" <= "SubscriberCount": "Subscribers",
        "ems.topic.durables" <= "DurableCount": "Durable subscribers",
        "ems.topic.consumers" <= "ConsumerCount": "Consumers",
        "ems.topic.inbound_messages" <= "InboundTotalMessages": "Messages received",
        "ems.topic.outbound_messages" <= "OutboundTotalMessages": "Messages delivered",
    ],
};

pub const DURABLE_INFO: Family = Family {
    name: "durable_info",
    identity: "DurableName",
    entity_label: "durable",
    resource: "durableinfo",
    entries: entries![
        "ems.durable.pending_messages" <= "PendingMessageCount": "Pending messages",
        "ems.durable.pending_bytes" <= "PendingMessageSize": "Pending message bytes",
        "ems.durable.delivered_messages" <= "DeliveredMessageCount": "Messages delivered",
    ],
};

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;
    use test_log::test;

    #[test]
    fn metric_names_are_unique_across_families() {
        let mut seen = HashSet::new();
        for entry in Family::ALL.iter().flat_map(|f| f.entries) {
            assert!(seen.insert(entry.metric), "duplicate metric {}", entry.metric);
        }
    }

    #[test]
    fn identity_is_never_tracked() {
        for family in Family::ALL {
            assert!(!family.entries.is_empty());
            assert!(family.entries.iter().all(|e| e.attribute != family.identity));
        }
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(Family::by_name("queue_info"), Some(&QUEUE_INFO));
        assert_eq!(Family::by_name("nope"), None);
        assert_eq!(PROCESS_DEFINITIONS.entries.len(), 17);
    }

    #[test]
    fn gauge_definition_carries_entity_label() {
        let def = PROCESS_DEFINITIONS.gauge(&PROCESS_DEFINITIONS.entries[0]);
        assert_eq!(def.name, "bwengine.processdefinition.created");
        assert_eq!(def.entity_label, "process");
    }
}
