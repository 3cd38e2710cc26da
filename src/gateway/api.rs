//! `/api/status` の JSON と `/` の HTML

use super::GatewaySnapshot;
use crate::device::DeviceId;
use crate::link::DeviceStatus;
use crate::time_sync::{format_clock, format_event_time};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

#[derive(Debug, Serialize)]
pub struct EventEntry {
    pub time: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<&'static str>,
}

/// `GET /api/status` の応答
///
/// プロップごとのキー（`rip_tombstone`, `halloween_trigger`）は
/// デバイス一覧から作るので、プロップが増えてもここは変わりません。
#[derive(Debug, Serialize)]
pub struct StatusDocument {
    pub time: String,
    pub pir_motion: bool,
    pub status_age_secs: Option<u64>,
    #[serde(flatten)]
    pub devices: BTreeMap<&'static str, DeviceStatus>,
    pub events: Vec<EventEntry>,
}

impl StatusDocument {
    pub fn from_snapshot(snapshot: &GatewaySnapshot, tz: &Tz) -> Self {
        Self {
            time: format_clock(snapshot.now, snapshot.time_synced, tz),
            pir_motion: snapshot.pir_motion,
            status_age_secs: snapshot.status_age_secs,
            devices: snapshot
                .devices
                .iter()
                .map(|(id, status)| (id.api_key(), *status))
                .collect(),
            events: snapshot
                .events
                .iter()
                .map(|event| EventEntry {
                    time: format_event_time(event.timestamp, tz),
                    kind: event.kind.as_str(),
                    device: event.device.map(|d| d.name()),
                })
                .collect(),
        }
    }
}

pub fn render_status_json(snapshot: &GatewaySnapshot, tz: &Tz) -> serde_json::Result<String> {
    serde_json::to_string(&StatusDocument::from_snapshot(snapshot, tz))
}

const PAGE_HEAD: &str = "<!DOCTYPE html><html><head><meta charset='utf-8'>\
<title>Zigbee Halloween Controller</title>\
<meta name='viewport' content='width=device-width, initial-scale=1'>\
<style>\
body{font-family:Arial;background:#1a1a1a;color:#fff;padding:20px;text-align:center}\
h1{color:#ff6b00}h2{color:#ff8c00}\
.status,.events{background:#2a2a2a;padding:15px;margin:20px 0;border-radius:10px}\
.events{max-height:300px;overflow-y:auto;text-align:left}\
.button{background:#ff6b00;color:#fff;border:none;padding:15px 30px;font-size:18px;\
margin:10px;border-radius:5px;cursor:pointer;min-width:200px}\
.motion{color:#00ff00;font-weight:bold}.time{color:#88aaff;font-size:14px}\
.event{padding:5px 0;border-bottom:1px solid #444;font-size:13px}\
.event-time{color:#88aaff;margin-right:10px}.event-device{color:#aaa;margin-left:5px}\
</style></head><body><h1>Zigbee Halloween Controller</h1>";

const PAGE_CONTROLS: &str = "<h2>Manual Control</h2>\
<form method='POST' action='/trigger/rip'><button class='button' type='submit'>Trigger RIP Tombstone</button></form>\
<form method='POST' action='/trigger/halloween'><button class='button' type='submit'>Trigger Pumpkin Scarecrow</button></form>\
<form method='POST' action='/trigger/both'><button class='button' type='submit'>Trigger BOTH</button></form>\
<script>setTimeout(function(){location.reload()},2000);</script></body></html>";

fn device_line(id: DeviceId, status: &DeviceStatus) -> String {
    format!(
        "<p id='{}'>{}: {} | Time: {} | <b>{}</b></p>",
        id.api_key(),
        id.name(),
        if status.connected { "Connected" } else { "Not connected" },
        if status.time_synced { "Synced" } else { "Not synced" },
        if status.in_cooldown { "COOLDOWN" } else { "READY" }
    )
}

/// `GET /` のページ
pub fn render_index(snapshot: &GatewaySnapshot, tz: &Tz) -> String {
    let mut page = String::with_capacity(4096);
    page.push_str(PAGE_HEAD);
    page.push_str("<div class='status'>");
    let _ = write!(
        page,
        "<p class='time'>{}</p><p>PIR Motion: <span class='motion'>{}</span></p>",
        format_clock(snapshot.now, snapshot.time_synced, tz),
        if snapshot.pir_motion { "DETECTED" } else { "None" }
    );
    for (id, status) in &snapshot.devices {
        page.push_str(&device_line(*id, status));
    }
    page.push_str("</div><div class='events'><h3>Event Log</h3>");

    if snapshot.events.is_empty() {
        page.push_str("<div class='event'>No events yet</div>");
    }
    for event in &snapshot.events {
        let _ = write!(
            page,
            "<div class='event'><span class='event-time'>{}</span>{}",
            format_event_time(event.timestamp, tz),
            event.kind.label()
        );
        if let Some(device) = event.device {
            let _ = write!(page, "<span class='event-device'>- {}</span>", device.name());
        }
        page.push_str("</div>");
    }

    page.push_str("</div>");
    page.push_str(PAGE_CONTROLS);
    page
}
