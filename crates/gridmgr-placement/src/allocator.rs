//! Port allocation over a host's slot range.

use uuid::Uuid;

use gridmgr_state::{HostRecord, RegionRecord};

use crate::error::{PlacementError, PlacementResult};

/// Pick a free port for a region on `host`.
///
/// `assigned` is the snapshot of regions currently placed on the host;
/// `exclude` skips the region being moved so it can be re-evaluated
/// against its own current port. Returns the lowest remaining free
/// port — callers rely on the result being stable for a fixed
/// snapshot — or `NoCapacity` when every slot is taken.
pub fn allocate_port(
    host: &HostRecord,
    assigned: &[RegionRecord],
    exclude: Option<Uuid>,
) -> PlacementResult<u16> {
    let taken: Vec<u16> = assigned
        .iter()
        .filter(|r| Some(r.uuid) != exclude)
        .filter_map(|r| r.port)
        .collect();

    (host.slots.min..=host.slots.max)
        .find(|port| !taken.contains(port))
        .ok_or_else(|| PlacementError::NoCapacity(host.address.clone()))
}
