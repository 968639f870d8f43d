//! Typed view of the scanner's XML report (`-oX`).
//!
//! Only the parts the engine reads are modelled; everything else in the
//! document is skipped by the deserializer.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct NmapRun {
    #[serde(rename = "host", default)]
    pub hosts: Vec<Host>,
    #[serde(default)]
    pub runstats: Option<RunStats>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunStats {
    #[serde(default)]
    pub finished: Option<Finished>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Finished {
    #[serde(rename = "@exit", default)]
    pub exit: Option<String>,
    #[serde(rename = "@errormsg", default)]
    pub errormsg: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Host {
    #[serde(default)]
    pub status: Option<HostStatus>,
    #[serde(rename = "address", default)]
    pub addresses: Vec<Address>,
    #[serde(default)]
    pub hostnames: Option<Hostnames>,
    #[serde(default)]
    pub ports: Option<Ports>,
    #[serde(default)]
    pub os: Option<Os>,
    #[serde(default)]
    pub hostscript: Option<HostScript>,
}

impl Host {
    /// Stable label for the host: first IP address, else first hostname.
    pub fn label(&self) -> Option<String> {
        self.addresses
            .iter()
            .find(|a| a.addrtype != "mac")
            .map(|a| a.addr.clone())
            .or_else(|| {
                self.hostnames
                    .as_ref()
                    .and_then(|h| h.names.first())
                    .map(|h| h.name.clone())
            })
    }

    pub fn open_ports(&self) -> impl Iterator<Item = &Port> {
        self.ports
            .iter()
            .flat_map(|p| p.ports.iter())
            .filter(|p| p.state.state == "open")
    }

    /// Hosts without a status element are treated as up.
    pub fn is_up(&self) -> bool {
        !self.status.as_ref().is_some_and(|s| s.state == "down")
    }

    pub fn host_scripts(&self) -> &[Script] {
        self.hostscript.as_ref().map(|h| h.scripts.as_slice()).unwrap_or(&[])
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HostStatus {
    #[serde(rename = "@state")]
    pub state: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Address {
    #[serde(rename = "@addr")]
    pub addr: String,
    #[serde(rename = "@addrtype", default)]
    pub addrtype: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Hostnames {
    #[serde(rename = "hostname", default)]
    pub names: Vec<Hostname>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Hostname {
    #[serde(rename = "@name")]
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Ports {
    #[serde(rename = "port", default)]
    pub ports: Vec<Port>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Port {
    #[serde(rename = "@protocol", default)]
    pub protocol: String,
    #[serde(rename = "@portid")]
    pub portid: u16,
    pub state: PortState,
    #[serde(default)]
    pub service: Option<Service>,
    #[serde(rename = "script", default)]
    pub scripts: Vec<Script>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PortState {
    #[serde(rename = "@state")]
    pub state: String,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct Service {
    #[serde(rename = "@name", default)]
    pub name: String,
    #[serde(rename = "@product", default)]
    pub product: Option<String>,
    #[serde(rename = "@version", default)]
    pub version: Option<String>,
    #[serde(rename = "@extrainfo", default)]
    pub extrainfo: Option<String>,
    #[serde(rename = "@tunnel", default)]
    pub tunnel: Option<String>,
}

impl Service {
    /// `product version`, e.g. `OpenSSH 7.2p2`, when the scanner identified it.
    pub fn product_version(&self) -> Option<String> {
        match (self.product.as_deref(), self.version.as_deref()) {
            (Some(p), Some(v)) => Some(format!("{p} {v}")),
            (Some(p), None) => Some(p.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Os {
    #[serde(rename = "osmatch", default)]
    pub matches: Vec<OsMatch>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OsMatch {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@accuracy", default)]
    pub accuracy: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HostScript {
    #[serde(rename = "script", default)]
    pub scripts: Vec<Script>,
}

/// One NSE script result: free-form `output` plus optional structured tables.
#[derive(Debug, Default, Deserialize)]
pub struct Script {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@output", default)]
    pub output: String,
    #[serde(rename = "elem", default)]
    pub elems: Vec<Elem>,
    #[serde(rename = "table", default)]
    pub tables: Vec<Table>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Table {
    #[serde(rename = "@key", default)]
    pub key: Option<String>,
    #[serde(rename = "elem", default)]
    pub elems: Vec<Elem>,
    #[serde(rename = "table", default)]
    pub tables: Vec<Table>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Elem {
    #[serde(rename = "@key", default)]
    pub key: Option<String>,
    #[serde(rename = "$text", default)]
    pub value: String,
}

impl Script {
    /// Every keyed element in the script's structured output, depth first.
    pub fn keyed_elems(&self) -> Vec<(&str, &str)> {
        fn walk<'a>(elems: &'a [Elem], tables: &'a [Table], out: &mut Vec<(&'a str, &'a str)>) {
            for e in elems {
                if let Some(k) = e.key.as_deref() {
                    out.push((k, e.value.trim()));
                }
            }
            for t in tables {
                walk(&t.elems, &t.tables, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.elems, &self.tables, &mut out);
        out
    }
}

/// Parse a complete report. A report the scanner itself marked as failed is an error.
pub fn parse_report(xml: &str) -> Result<NmapRun> {
    let run: NmapRun = quick_xml::de::from_str(xml).context("malformed scanner XML report")?;
    if let Some(finished) = run.runstats.as_ref().and_then(|r| r.finished.as_ref()) {
        if finished.exit.as_deref() == Some("error") {
            bail!(
                "scanner reported an error: {}",
                finished.errormsg.as_deref().unwrap_or("no message")
            );
        }
    }
    Ok(run)
}
