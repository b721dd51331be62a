// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Engine configuration.

use crate::credential::PasswordHashing;
use std::time::Duration;

/// Settings fixed when a device is opened.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How operator-supplied passwords are turned into keys.
    pub password_hashing: PasswordHashing,
    /// How long to keep polling for a response.
    pub receive_timeout: Duration,
    /// Delay between receives while the device reports outstanding data.
    pub poll_interval: Duration,
    /// Size of the receive buffer, and the largest request that will be
    /// sent.
    pub max_packet_size: usize,
    /// Requests are zero-padded to a multiple of this.
    pub transfer_alignment: usize,
    /// Bytes of PBA image written per `Set`.
    pub pba_chunk_size: usize,
    /// Log every request and response at trace level.
    pub dump_wire: bool,
    /// Use this ComID instead of the one from Level 0 Discovery.
    pub com_id_override: Option<u16>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            password_hashing: PasswordHashing::default(),
            receive_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(25),
            max_packet_size: 2048,
            transfer_alignment: 512,
            pba_chunk_size: 1024,
            dump_wire: false,
            com_id_override: None,
        }
    }
}
