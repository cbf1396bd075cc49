//! Packet-capture adapter.
//!
//! Reads an offline capture file, dissects link/IP/transport layers, and
//! reconstructs flows by grouping packets into
//! (source_ip, dest_ip, source_port, dest_port, protocol) tuples. A flow
//! is cut when it sits idle past the configured session timeout; byte
//! counts are direction-aware (forward = the first-seen direction). One
//! normalized record is emitted per completed flow.

use etherparse::{InternetSlice, SlicedPacket, TransportSlice};
use pcap_file::pcap::PcapReader;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use super::{AdapterKind, TrafficAdapter};
use crate::logic::error::{CoreError, CoreResult};
use crate::logic::schema::{ConnState, IngestReport, NormalizedRecord, Protocol};

type FlowKey = (String, String, u16, u16, Protocol);

pub struct CaptureAdapter {
    flow_timeout: f64,
}

impl CaptureAdapter {
    pub fn new(flow_timeout_secs: u64) -> Self {
        Self {
            flow_timeout: flow_timeout_secs as f64,
        }
    }
}

// ============================================================================
// FLOW AGGREGATION
// ============================================================================

#[derive(Debug)]
struct FlowAgg {
    source_ip: String,
    dest_ip: String,
    source_port: u16,
    dest_port: u16,
    protocol: Protocol,
    first_ts: f64,
    last_ts: f64,
    orig_bytes: u64,
    resp_bytes: u64,
    packets: u64,
    syn: bool,
    fin: bool,
    rst: bool,
    responded: bool,
}

impl FlowAgg {
    fn start(packet: &PacketInfo) -> Self {
        let mut flow = Self {
            source_ip: packet.src_ip.clone(),
            dest_ip: packet.dst_ip.clone(),
            source_port: packet.src_port,
            dest_port: packet.dst_port,
            protocol: packet.protocol,
            first_ts: packet.ts,
            last_ts: packet.ts,
            orig_bytes: 0,
            resp_bytes: 0,
            packets: 0,
            syn: false,
            fin: false,
            rst: false,
            responded: false,
        };
        flow.absorb(packet, true);
        flow
    }

    fn absorb(&mut self, packet: &PacketInfo, forward: bool) {
        self.last_ts = packet.ts;
        self.packets += 1;
        if forward {
            self.orig_bytes += packet.length;
        } else {
            self.resp_bytes += packet.length;
            self.responded = true;
        }
        self.syn |= packet.syn;
        self.fin |= packet.fin;
        self.rst |= packet.rst;
    }

    fn conn_state(&self) -> ConnState {
        if self.rst {
            ConnState::Rst
        } else if self.syn && !self.responded {
            ConnState::S0
        } else if self.responded || self.fin {
            ConnState::Sf
        } else {
            ConnState::Other
        }
    }

    fn into_record(self) -> NormalizedRecord {
        let service = service_for_port(self.dest_port)
            .or_else(|| service_for_port(self.source_port))
            .unwrap_or("unknown");
        let conn_state = self.conn_state();

        NormalizedRecord {
            device_id: NormalizedRecord::device_id_from_ip(&self.source_ip),
            timestamp: timestamp_from_secs(self.first_ts),
            source_ip: self.source_ip,
            dest_ip: self.dest_ip,
            source_port: self.source_port,
            dest_port: self.dest_port,
            protocol: self.protocol,
            service: service.to_string(),
            duration: (self.last_ts - self.first_ts).max(0.0),
            orig_bytes: self.orig_bytes,
            resp_bytes: self.resp_bytes,
            packet_count: self.packets,
            conn_state,
            ..Default::default()
        }
    }
}

/// Per-packet fields pulled out of the dissected layers
struct PacketInfo {
    ts: f64,
    length: u64,
    src_ip: String,
    dst_ip: String,
    src_port: u16,
    dst_port: u16,
    protocol: Protocol,
    syn: bool,
    fin: bool,
    rst: bool,
}

impl TrafficAdapter for CaptureAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Capture
    }

    fn parse(&self, path: &Path) -> CoreResult<IngestReport> {
        let file = File::open(path)
            .map_err(|e| CoreError::SourceUnreadable(format!("{}: {}", path.display(), e)))?;
        // A bad global header fails here: fatal for the source
        let mut reader = PcapReader::new(file).map_err(|e| {
            CoreError::SourceUnreadable(format!("corrupt capture {}: {}", path.display(), e))
        })?;

        let mut report = IngestReport::default();
        let mut flows: HashMap<FlowKey, FlowAgg> = HashMap::new();
        let mut completed: Vec<NormalizedRecord> = Vec::new();
        let mut index = 0usize;

        while let Some(next) = reader.next_packet() {
            let packet = match next {
                Ok(packet) => packet,
                Err(e) => {
                    // Truncated tail record: account for it and stop
                    report.skip(index, format!("unreadable packet record: {}", e));
                    break;
                }
            };

            let ts = packet.timestamp.as_secs_f64();
            let info = match dissect(&packet.data, ts) {
                Ok(info) => info,
                Err(reason) => {
                    report.skip(index, reason);
                    index += 1;
                    continue;
                }
            };
            index += 1;

            let forward_key = (
                info.src_ip.clone(),
                info.dst_ip.clone(),
                info.src_port,
                info.dst_port,
                info.protocol,
            );
            let reverse_key = (
                info.dst_ip.clone(),
                info.src_ip.clone(),
                info.dst_port,
                info.src_port,
                info.protocol,
            );

            let (key, forward) = if flows.contains_key(&forward_key) {
                (forward_key, true)
            } else if flows.contains_key(&reverse_key) {
                (reverse_key, false)
            } else {
                (forward_key, true)
            };

            // Idle past the session window: the old flow is done, this
            // packet opens a fresh one
            let idle = flows
                .get(&key)
                .map_or(false, |flow| info.ts - flow.last_ts > self.flow_timeout);
            if idle {
                if let Some(finished) = flows.remove(&key) {
                    completed.push(finished.into_record());
                }
            }

            match flows.get_mut(&key) {
                Some(flow) => flow.absorb(&info, forward),
                None => {
                    flows.insert(key, FlowAgg::start(&info));
                }
            }
        }

        // Flush still-open flows, oldest first for a stable output order
        let mut remainder: Vec<FlowAgg> = flows.into_values().collect();
        remainder.sort_by(|a, b| {
            a.first_ts
                .partial_cmp(&b.first_ts)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.source_ip.cmp(&b.source_ip))
                .then_with(|| a.source_port.cmp(&b.source_port))
        });
        completed.extend(remainder.into_iter().map(FlowAgg::into_record));

        for record in completed {
            report.push_record(record);
        }

        log::info!(
            "capture ingest from {}: {} packets read, {} flows, {} skipped",
            path.display(),
            index,
            report.parsed_count,
            report.skipped_count
        );
        Ok(report)
    }
}

// ============================================================================
// PACKET DISSECTION
// ============================================================================

fn dissect(data: &[u8], ts: f64) -> Result<PacketInfo, String> {
    let sliced =
        SlicedPacket::from_ethernet(data).map_err(|e| format!("undecodable frame: {}", e))?;

    let (src_ip, dst_ip) = match &sliced.net {
        Some(InternetSlice::Ipv4(ipv4)) => (
            ipv4.header().source_addr().to_string(),
            ipv4.header().destination_addr().to_string(),
        ),
        Some(InternetSlice::Ipv6(_)) => return Err("non-IPv4 packet".to_string()),
        None => return Err("no IP layer".to_string()),
    };

    let (protocol, src_port, dst_port, syn, fin, rst) = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => (
            Protocol::Tcp,
            tcp.source_port(),
            tcp.destination_port(),
            tcp.syn(),
            tcp.fin(),
            tcp.rst(),
        ),
        Some(TransportSlice::Udp(udp)) => (
            Protocol::Udp,
            udp.source_port(),
            udp.destination_port(),
            false,
            false,
            false,
        ),
        Some(TransportSlice::Icmpv4(_)) => (Protocol::Icmp, 0, 0, false, false, false),
        _ => (Protocol::Other, 0, 0, false, false, false),
    };

    Ok(PacketInfo {
        ts,
        length: data.len() as u64,
        src_ip,
        dst_ip,
        src_port,
        dst_port,
        protocol,
        syn,
        fin,
        rst,
    })
}

fn timestamp_from_secs(secs: f64) -> Option<chrono::DateTime<chrono::Utc>> {
    let whole = secs.trunc() as i64;
    let nanos = (secs.fract() * 1e9) as u32;
    chrono::DateTime::from_timestamp(whole, nanos)
}

/// Well-known-port service guess for capture sources, which carry no
/// application-layer service field
fn service_for_port(port: u16) -> Option<&'static str> {
    match port {
        21 => Some("ftp"),
        22 => Some("ssh"),
        23 => Some("telnet"),
        25 => Some("smtp"),
        53 => Some("dns"),
        80 => Some("http"),
        110 => Some("pop3"),
        143 => Some("imap"),
        443 => Some("https"),
        1883 | 8883 => Some("mqtt"),
        5683 => Some("coap"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_for_port() {
        assert_eq!(service_for_port(80), Some("http"));
        assert_eq!(service_for_port(1883), Some("mqtt"));
        assert_eq!(service_for_port(60000), None);
    }

    #[test]
    fn test_conn_state_heuristic() {
        let base = PacketInfo {
            ts: 0.0,
            length: 100,
            src_ip: "10.0.0.1".to_string(),
            dst_ip: "10.0.0.2".to_string(),
            src_port: 50000,
            dst_port: 80,
            protocol: Protocol::Tcp,
            syn: true,
            fin: false,
            rst: false,
        };

        // SYN with no response
        let flow = FlowAgg::start(&base);
        assert_eq!(flow.conn_state(), ConnState::S0);

        // Reply packet arrives: established
        let mut flow = FlowAgg::start(&base);
        flow.absorb(
            &PacketInfo {
                syn: false,
                ..clone_info(&base)
            },
            false,
        );
        assert_eq!(flow.conn_state(), ConnState::Sf);

        // RST wins over everything
        let mut flow = FlowAgg::start(&base);
        flow.absorb(
            &PacketInfo {
                rst: true,
                ..clone_info(&base)
            },
            false,
        );
        assert_eq!(flow.conn_state(), ConnState::Rst);
    }

    fn clone_info(info: &PacketInfo) -> PacketInfo {
        PacketInfo {
            ts: info.ts,
            length: info.length,
            src_ip: info.src_ip.clone(),
            dst_ip: info.dst_ip.clone(),
            src_port: info.src_port,
            dst_port: info.dst_port,
            protocol: info.protocol,
            syn: info.syn,
            fin: info.fin,
            rst: info.rst,
        }
    }
}
