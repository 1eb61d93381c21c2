//! Canned system layouts the emulator can pretend to be.

use std::collections::HashMap;

use cinelink_protocol::status;

/// One frame the emulator sends back for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub name: String,
    pub fields: Vec<String>,
}

impl Reply {
    /// A successful reply with a name and fields.
    pub fn ok(name: &str, fields: &[&str]) -> Self {
        Self {
            status: status::SUCCESS,
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// A bare acknowledgement (`000:`).
    pub fn ack() -> Self {
        Self::status(status::SUCCESS)
    }

    /// A reply carrying only a status code.
    pub fn status(code: u16) -> Self {
        Self {
            status: code,
            name: String::new(),
            fields: Vec::new(),
        }
    }
}

/// Which system the emulator starts out as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fixture {
    /// One unit, serial `00000000123A`, no cpdid.
    SingleDevice,
    /// Two units (`...123A` local, `...123B` peer), no cpdids.
    MultiDevice,
    /// Two units with cpdids: `02` local, `03` peer.
    MultiDeviceCpdid,
}

/// Routing id → command name → replies.
pub(crate) type CommandTable = HashMap<String, HashMap<String, Vec<Reply>>>;

const ALL_IDS: &[&str] = &["01", "02", "#00000000123A", "03", "#00000000123B"];

const ACKED: &[&str] = &[
    "ENABLE_EVENTS",
    "LEAVE_STANDBY",
    "ENTER_STANDBY",
    "PLAY",
    "PAUSE",
    "STOP",
    "NEXT",
    "PREVIOUS",
    "REPLAY",
    "SCAN_FORWARD",
    "SCAN_REVERSE",
    "SELECT",
    "UP",
    "DOWN",
    "LEFT",
    "RIGHT",
    "CANCEL",
    "GO_MOVIE_COVERS",
    "KALEIDESCAPE_MENU_TOGGLE",
    "_SLEEP",
];

pub(crate) fn register(table: &mut CommandTable, ids: &[&str], name: &str, replies: Vec<Reply>) {
    for id in ids {
        table
            .entry(id.to_string())
            .or_default()
            .insert(name.to_string(), replies.clone());
    }
}

impl Fixture {
    pub(crate) fn build(self) -> CommandTable {
        let mut t = CommandTable::new();
        match self {
            Self::SingleDevice => single_device(&mut t),
            Self::MultiDevice => multi_device(&mut t),
            Self::MultiDeviceCpdid => multi_device_cpdid(&mut t),
        }
        common(&mut t);
        t
    }
}

fn identity(t: &mut CommandTable, ids: &[&str], serial: &str, cpdid: &str, ip: &str, name: &str) {
    register(
        t,
        ids,
        "GET_DEVICE_INFO",
        vec![Reply::ok("DEVICE_INFO", &["", serial, cpdid, ip])],
    );
    register(t, ids, "GET_FRIENDLY_NAME", vec![Reply::ok("FRIENDLY_NAME", &[name])]);
}

fn single_device(t: &mut CommandTable) {
    let local = &["01", "#00000000123A"];
    register(
        t,
        local,
        "GET_AVAILABLE_DEVICES_BY_SERIAL_NUMBER",
        vec![Reply::ok("AVAILABLE_DEVICES_BY_SERIAL_NUMBER", &["00000000123A"])],
    );
    register(
        t,
        local,
        "GET_AVAILABLE_DEVICES",
        vec![Reply::ok("AVAILABLE_DEVICES", &["01"])],
    );
    identity(t, local, "00000000123A", "00", "192.168.0.1", "Theater");
    register(
        t,
        local,
        "GET_CONTENT_DETAILS",
        vec![
            Reply::ok("CONTENT_DETAILS_OVERVIEW", &["2", "26-0.0-S_c446c8e2", "movies"]),
            Reply::ok("CONTENT_DETAILS", &["1", "Content_handle", "26-0.0-S_c446c8e2"]),
            Reply::ok("CONTENT_DETAILS", &["2", "Title", "Turtle Odyssey"]),
        ],
    );
}

fn multi_device(t: &mut CommandTable) {
    let local = &["01", "#00000000123A"];
    register(
        t,
        local,
        "GET_AVAILABLE_DEVICES_BY_SERIAL_NUMBER",
        vec![Reply::ok(
            "AVAILABLE_DEVICES_BY_SERIAL_NUMBER",
            &["00000000123A", "00000000123B"],
        )],
    );
    register(
        t,
        local,
        "GET_AVAILABLE_DEVICES",
        vec![Reply::ok("AVAILABLE_DEVICES", &["01"])],
    );
    identity(t, local, "00000000123A", "00", "192.168.0.1", "Theater");
    identity(t, &["#00000000123B"], "00000000123B", "00", "192.168.0.2", "Media Room");
}

fn multi_device_cpdid(t: &mut CommandTable) {
    let local = &["01", "02", "#00000000123A"];
    let peer = &["03", "#00000000123B"];
    register(
        t,
        local,
        "GET_AVAILABLE_DEVICES_BY_SERIAL_NUMBER",
        vec![Reply::ok(
            "AVAILABLE_DEVICES_BY_SERIAL_NUMBER",
            &["00000000123A", "00000000123B"],
        )],
    );
    register(
        t,
        local,
        "GET_AVAILABLE_DEVICES",
        vec![Reply::ok("AVAILABLE_DEVICES", &["01", "02", "03"])],
    );
    identity(t, local, "00000000123A", "02", "192.168.0.1", "Theater");
    identity(t, peer, "00000000123B", "03", "192.168.0.2", "Media Room");
}

/// Commands every unit in every fixture answers the same way.
///
/// Only ids that already exist in the table get them, so a fixture
/// without cpdids does not suddenly answer on `02`.
fn common(t: &mut CommandTable) {
    let ids: Vec<&str> = ALL_IDS
        .iter()
        .copied()
        .filter(|id| t.contains_key(*id))
        .collect();

    let state: &[(&str, &str, &[&str])] = &[
        ("GET_SYSTEM_VERSION", "SYSTEM_VERSION", &["16", "10.4.2-19218"]),
        ("GET_NUM_ZONES", "NUM_ZONES", &["01", "01"]),
        ("GET_DEVICE_TYPE_NAME", "DEVICE_TYPE_NAME", &["Strato S"]),
        ("GET_DEVICE_POWER_STATE", "DEVICE_POWER_STATE", &["0", "0"]),
        ("GET_SYSTEM_READINESS_STATE", "SYSTEM_READINESS_STATE", &["2"]),
        ("GET_FRIENDLY_SYSTEM_NAME", "FRIENDLY_SYSTEM_NAME", &["Home Cinema"]),
        ("GET_ZONE_CAPABILITIES", "ZONE_CAPABILITIES", &["Y", "Y", "N", "Y"]),
        ("GET_UI_STATE", "UI_STATE", &["01", "00", "00", "0"]),
        ("GET_HIGHLIGHTED_SELECTION", "HIGHLIGHTED_SELECTION", &[""]),
        (
            "GET_PLAY_STATUS",
            "PLAY_STATUS",
            &["0", "1", "00", "00000", "00000", "000", "00000", "00000"],
        ),
        ("GET_MOVIE_LOCATION", "MOVIE_LOCATION", &["03"]),
        ("GET_VIDEO_COLOR", "VIDEO_COLOR", &["00", "00", "24", "00"]),
        ("GET_VIDEO_MODE", "VIDEO_MODE", &["00", "00", "00"]),
        ("GET_SCREEN_MASK", "SCREEN_MASK", &["00", "000", "000", "05", "0000", "0000"]),
        ("GET_SCREEN_MASK2", "SCREEN_MASK2", &["00", "00", "00000", "00000"]),
        ("GET_CINEMASCAPE_MODE", "CINEMASCAPE_MODE", &["0"]),
        ("GET_CINEMASCAPE_MASK", "CINEMASCAPE_MASK", &["000"]),
    ];
    for (request, response, fields) in state {
        register(t, &ids, request, vec![Reply::ok(response, fields)]);
    }
    for name in ACKED {
        register(t, &ids, name, vec![Reply::ack()]);
    }
}
