//! Demo consumer: watches every enumerated interface and logs each change.

use anyhow::{bail, Context};
use clap::Parser;
use ifwatch_types::{Interface, IpAddress, MacAddress};
use ifwatchd::{
    Interfaces, LinkFlags, NetworkAddresses, NetworkMonitor, OperationalState, RuntimeFlag,
    RuntimeFlags, Subscriber, SubscriberHandle,
};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ifwatchd", about = "Watch kernel network-interface state over rtnetlink")]
struct Cli {
    /// Periodically log detailed monitor statistics
    #[arg(long)]
    nerdstats: bool,

    /// Hex-dump every received datagram
    #[arg(long)]
    dump_packets: bool,

    /// Preferred address family (4 or 6)
    #[arg(long)]
    family: Option<u8>,

    /// Track interfaces beyond Ethernet and 802.11
    #[arg(long)]
    include_non_ieee802: bool,

    /// Open the netlink socket in non-blocking mode
    #[arg(long)]
    non_blocking: bool,

    /// Log filter, e.g. "info" or "ifwatchd=trace"
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Prints every notification through the logging sink.
struct EventPrinter;

impl Subscriber for EventPrinter {
    fn on_interface_added(&mut self, interface: &Interface) {
        info!(%interface, "interface added");
    }

    fn on_interface_removed(&mut self, interface: &Interface) {
        info!(%interface, "interface removed");
    }

    fn on_interface_name_changed(&mut self, interface: &Interface) {
        info!(%interface, "interface renamed");
    }

    fn on_link_flags_changed(&mut self, interface: &Interface, flags: LinkFlags) {
        info!(%interface, %flags, "link flags changed");
    }

    fn on_operational_state_changed(&mut self, interface: &Interface, state: OperationalState) {
        info!(%interface, %state, "operational state changed");
    }

    fn on_network_addresses_changed(&mut self, interface: &Interface, addresses: &NetworkAddresses) {
        let rendered: Vec<String> = addresses.iter().map(ToString::to_string).collect();
        info!(%interface, addresses = %rendered.join(", "), "addresses changed");
    }

    fn on_gateway_address_changed(&mut self, interface: &Interface, gateway: Option<IpAddress>) {
        match gateway {
            Some(gateway) => info!(%interface, %gateway, "gateway changed"),
            None => info!(%interface, "gateway removed"),
        }
    }

    fn on_mac_address_changed(&mut self, interface: &Interface, address: MacAddress) {
        info!(%interface, %address, "mac address changed");
    }

    fn on_broadcast_address_changed(&mut self, interface: &Interface, address: MacAddress) {
        info!(%interface, %address, "broadcast address changed");
    }
}

fn runtime_flags(cli: &Cli) -> anyhow::Result<RuntimeFlags> {
    let mut flags = RuntimeFlags::empty();
    if cli.nerdstats {
        flags.set(RuntimeFlag::StatsForNerds);
    }
    if cli.dump_packets {
        flags.set(RuntimeFlag::DumpPackets);
    }
    if cli.include_non_ieee802 {
        flags.set(RuntimeFlag::IncludeNonIeee802);
    }
    if cli.non_blocking {
        flags.set(RuntimeFlag::NonBlocking);
    }
    match cli.family {
        None => {}
        Some(4) => flags.set(RuntimeFlag::PreferredFamilyV4),
        Some(6) => flags.set(RuntimeFlag::PreferredFamilyV6),
        Some(other) => bail!("unsupported address family {other}, expected 4 or 6"),
    }
    Ok(flags)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log filter {:?}", cli.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();

    let flags = runtime_flags(&cli)?;
    let mut monitor = NetworkMonitor::new(flags);

    let _interfaces_token = monitor.add_interfaces_listener(|interfaces: &Interfaces| {
        let rendered: Vec<String> = interfaces.iter().map(ToString::to_string).collect();
        info!(interfaces = %rendered.join(", "), "tracked interfaces changed");
    });

    let interfaces = monitor.enumerate_interfaces();
    info!(count = interfaces.len(), "enumerated interfaces");

    let printer: SubscriberHandle = Rc::new(RefCell::new(EventPrinter));
    monitor.subscribe(interfaces, printer);

    monitor.run();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("ifwatchd").chain(args.iter().copied()))
    }

    #[test]
    fn default_flags_are_empty() {
        let flags = runtime_flags(&parse(&[])).unwrap();
        assert!(flags.none());
    }

    #[test]
    fn family_selects_a_preference() {
        let flags = runtime_flags(&parse(&["--family", "4"])).unwrap();
        assert!(flags.test(RuntimeFlag::PreferredFamilyV4));
        let flags = runtime_flags(&parse(&["--family", "6"])).unwrap();
        assert!(flags.test(RuntimeFlag::PreferredFamilyV6));
        assert!(runtime_flags(&parse(&["--family", "5"])).is_err());
    }

    #[test]
    fn toggles_map_to_runtime_flags() {
        let flags =
            runtime_flags(&parse(&["--nerdstats", "--dump-packets", "--include-non-ieee802"]))
                .unwrap();
        assert!(flags.test(RuntimeFlag::StatsForNerds));
        assert!(flags.test(RuntimeFlag::DumpPackets));
        assert!(flags.test(RuntimeFlag::IncludeNonIeee802));
        assert!(!flags.test(RuntimeFlag::NonBlocking));
    }
}
