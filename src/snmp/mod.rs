//! SNMP v2c probing: BER codec, UDP client and device discovery

pub mod ber;
pub mod client;
pub mod discovery;

pub use ber::{SnmpMessage, SnmpValue};
pub use client::SnmpClient;
pub use discovery::{SnmpAccess, SnmpDeviceInfo, SnmpDiscovery, DEFAULT_COMMUNITIES};

/// Well-known MIB-II and HOST-RESOURCES object identifiers
pub mod oids {
    pub const SYS_DESCR: [u32; 9] = [1, 3, 6, 1, 2, 1, 1, 1, 0];
    pub const SYS_OBJECT_ID: [u32; 9] = [1, 3, 6, 1, 2, 1, 1, 2, 0];
    pub const SYS_UPTIME: [u32; 9] = [1, 3, 6, 1, 2, 1, 1, 3, 0];
    pub const SYS_CONTACT: [u32; 9] = [1, 3, 6, 1, 2, 1, 1, 4, 0];
    pub const SYS_NAME: [u32; 9] = [1, 3, 6, 1, 2, 1, 1, 5, 0];
    pub const SYS_LOCATION: [u32; 9] = [1, 3, 6, 1, 2, 1, 1, 6, 0];
    pub const IF_NUMBER: [u32; 9] = [1, 3, 6, 1, 2, 1, 2, 1, 0];

    // ifTable columns, append the interface index
    pub const IF_DESCR: [u32; 10] = [1, 3, 6, 1, 2, 1, 2, 2, 1, 2];
    pub const IF_TYPE: [u32; 10] = [1, 3, 6, 1, 2, 1, 2, 2, 1, 3];
    pub const IF_SPEED: [u32; 10] = [1, 3, 6, 1, 2, 1, 2, 2, 1, 5];
    pub const IF_PHYS_ADDRESS: [u32; 10] = [1, 3, 6, 1, 2, 1, 2, 2, 1, 6];

    pub const HR_SYSTEM_UPTIME: [u32; 10] = [1, 3, 6, 1, 2, 1, 25, 1, 1, 0];
    pub const HR_SYSTEM_NUM_USERS: [u32; 10] = [1, 3, 6, 1, 2, 1, 25, 1, 5, 0];
    pub const HR_SYSTEM_PROCESSES: [u32; 10] = [1, 3, 6, 1, 2, 1, 25, 1, 6, 0];

    pub const HOST_RESOURCES: [(&str, &[u32]); 3] = [
        ("hrSystemUptime", &HR_SYSTEM_UPTIME),
        ("hrSystemNumUsers", &HR_SYSTEM_NUM_USERS),
        ("hrSystemProcesses", &HR_SYSTEM_PROCESSES),
    ];

    /// Column OID with a row index appended
    pub fn indexed(column: &[u32], index: u32) -> Vec<u32> {
        let mut oid = column.to_vec();
        oid.push(index);
        oid
    }
}
