mod sim;

use crate::sim::{node_addr, Cell};
use anyhow::Result;
use log::info;
use sdn::concepts::route::RoutingTableEntry;
use sdn::framework::ProtocolConfig;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::net::Ipv4Addr;
use std::time::Duration;

fn main() -> Result<()> {
    TermLogger::init(
        LevelFilter::Debug,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;

    info!("vanet demo: one roadside controller and three cars in a radio cell");

    let mut cell = Cell::new();
    let config = ProtocolConfig::default();
    let controller = cell.add_node(config.clone(), [0.0, 0.0, 0.0], [0.0, 0.0, 0.0]);
    let cars = [
        cell.add_node(config.clone(), [-120.0, 0.0, 0.0], [18.0, 0.0, 0.0]),
        cell.add_node(config.clone(), [-60.0, 4.0, 0.0], [22.0, 0.0, 0.0]),
        cell.add_node(config.clone(), [40.0, -4.0, 0.0], [-15.0, 0.0, 0.0]),
    ];

    for router in cell.routers.iter_mut() {
        router.set_main_interface(0)?;
        router.initialize()?;
        router.notify_interface_up(0);
    }

    // the controller knows the backbone and offers itself as the gateway
    cell.routers[controller].table.insert(RoutingTableEntry {
        dest_addr: Ipv4Addr::new(10, 2, 0, 0),
        mask: Ipv4Addr::new(255, 255, 0, 0),
        next_hop: node_addr(controller),
        interface: 0,
    });
    cell.routers[controller].table.insert(RoutingTableEntry {
        dest_addr: Ipv4Addr::new(0, 0, 0, 0),
        mask: Ipv4Addr::new(0, 0, 0, 0),
        next_hop: node_addr(controller),
        interface: 0,
    });

    // every node floods its table on the rm cadence; cars drive meanwhile
    let end = Duration::from_secs(20);
    let step = Duration::from_secs(1);
    let mut next_rm = Duration::ZERO;
    while cell.now() < end {
        if cell.now() >= next_rm {
            for router in cell.routers.iter_mut() {
                router.broadcast_routing_table()?;
            }
            next_rm += config.rm_interval;
        }
        cell.run_for(step);
        cell.advance_motion(step);
    }

    let backbone_host = Ipv4Addr::new(10, 2, 7, 33);
    for &car in &cars {
        let route = cell.routers[car].route_output(backbone_host)?;
        info!(
            "car {car}: {backbone_host} via {} out interface {}",
            route.next_hop, route.out_interface
        );
    }

    let table = serde_json::to_string_pretty(&cell.routers[cars[0]].table)?;
    info!("car {} table:\n{table}", cars[0]);
    cell.routers[cars[0]].dump();

    let (frames, bytes) = cell.stats();
    info!("cell carried {frames} frame(s), {bytes} byte(s) in {:?}", end);

    for router in cell.routers.iter_mut() {
        router.dispose();
    }
    Ok(())
}
