//! Inventory commands for the local provider.

use serde::Serialize;

use replscale_autoscale::{Clock, SystemClock};
use replscale_core::STATUS_AVAILABLE;
use replscale_state::{InstanceRecord, StateStore, TaskRecord};

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn put_instance(
    store: &StateStore,
    name: String,
    arn: String,
    class: String,
    status: String,
) -> anyhow::Result<()> {
    let record = InstanceRecord {
        name,
        arn,
        class,
        status,
        pending_class: None,
        updated_at: SystemClock.now_secs(),
    };
    store.put_instance(&record)?;
    print_json(&record)
}

/// Finish whatever resize the provider was applying.
pub fn settle_instance(store: &StateStore, name: &str) -> anyhow::Result<()> {
    let record = store.settle_instance(name, STATUS_AVAILABLE, SystemClock.now_secs())?;
    print_json(&record)
}

pub fn put_task(
    store: &StateStore,
    task_id: String,
    arn: String,
    instance_arn: String,
    status: String,
) -> anyhow::Result<()> {
    let record = TaskRecord {
        task_id,
        arn,
        instance_arn,
        status,
        updated_at: SystemClock.now_secs(),
    };
    store.put_task(&record)?;
    print_json(&record)
}
