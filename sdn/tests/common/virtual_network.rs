use sdn::concepts::message::{MessageHeader, Vector3};
use sdn::concepts::packet::PacketHeader;
use sdn::framework::{
    Clock, Ipv4Layer, Mobility, ProtocolConfig, RoutingSystem, TimerEvent, TraceSink, Transport,
};
use sdn::router::Router;
use std::cell::{Ref, RefCell};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::io;
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;

/// A deterministic broadcast world for driving routers in tests.
///
/// Virtual time only moves inside `run_until`; events due at the same
/// instant fire in the order they were scheduled. Frames are delivered to
/// every other node with a socket on the destination subnet after a fixed
/// latency, or silently dropped while `drop_frames` is set.
pub struct VirtualVanet {
    pub routers: Vec<Router<VirtualVanet>>,
    world: Rc<RefCell<World>>,
    traces: Vec<Rc<RefCell<TraceRecords>>>,
    motions: Vec<Rc<RefCell<(Vector3, Vector3)>>>,
}

impl RoutingSystem for VirtualVanet {
    type Socket = VirtualSocket;
    type TimerHandle = u64;
    type Transport = VirtualTransport;
    type Clock = VirtualClock;
    type Ipv4Layer = VirtualIpv4;
    type Mobility = VirtualMobility;
    type Trace = RecordingTrace;
}

pub const LATENCY: Duration = Duration::from_millis(1);

#[derive(Default)]
struct World {
    now: Duration,
    next_order: u64,
    next_timer: u64,
    cancelled: HashSet<u64>,
    events: BinaryHeap<Event>,
    sockets: Vec<SocketReg>,
    // per node, per interface: the assigned (address, mask), if any
    node_ifaces: Vec<Vec<Option<(Ipv4Addr, Ipv4Addr)>>>,
    drop_frames: bool,
}

struct SocketReg {
    node: usize,
    interface: u32,
    addr: Ipv4Addr,
    mask: Ipv4Addr,
    port: u16,
}

struct Event {
    at: Duration,
    order: u64,
    kind: EventKind,
}

enum EventKind {
    Timer {
        node: usize,
        id: u64,
        event: TimerEvent,
    },
    Deliver {
        node: usize,
        interface: u32,
        frame: Vec<u8>,
    },
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.order == other.order
    }
}
impl Eq for Event {}
impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Event {
    // reversed so the BinaryHeap pops the earliest (at, order) first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.order.cmp(&self.order))
    }
}

pub struct VirtualSocket {
    addr: Ipv4Addr,
    port: u16,
}

pub struct VirtualTransport {
    world: Rc<RefCell<World>>,
    node: usize,
}

impl Transport<VirtualVanet> for VirtualTransport {
    fn open(&mut self, interface: u32, local: Ipv4Addr, port: u16) -> io::Result<VirtualSocket> {
        let mut world = self.world.borrow_mut();
        let mask = world
            .node_ifaces
            .get(self.node)
            .and_then(|ifaces| ifaces.get(interface as usize))
            .and_then(|assigned| *assigned)
            .map(|(_, mask)| mask)
            .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no such interface"))?;
        world.sockets.push(SocketReg {
            node: self.node,
            interface,
            addr: local,
            mask,
            port,
        });
        Ok(VirtualSocket { addr: local, port })
    }

    fn send_to(&mut self, _socket: &mut VirtualSocket, frame: &[u8], dest: Ipv4Addr, port: u16) {
        let mut world = self.world.borrow_mut();
        if world.drop_frames {
            return;
        }
        let at = world.now + LATENCY;
        let sender = self.node;
        let targets: Vec<(usize, u32)> = world
            .sockets
            .iter()
            .filter(|reg| reg.node != sender && reg.port == port)
            .filter(|reg| {
                u32::from(reg.addr) & u32::from(reg.mask) == u32::from(dest) & u32::from(reg.mask)
            })
            .map(|reg| (reg.node, reg.interface))
            .collect();
        for (node, interface) in targets {
            let order = world.next_order;
            world.next_order += 1;
            world.events.push(Event {
                at,
                order,
                kind: EventKind::Deliver {
                    node,
                    interface,
                    frame: frame.to_vec(),
                },
            });
        }
    }

    fn close(&mut self, socket: VirtualSocket) {
        let mut world = self.world.borrow_mut();
        let node = self.node;
        world
            .sockets
            .retain(|reg| !(reg.node == node && reg.addr == socket.addr && reg.port == socket.port));
    }
}

pub struct VirtualClock {
    world: Rc<RefCell<World>>,
    node: usize,
}

impl Clock<VirtualVanet> for VirtualClock {
    fn schedule_after(&mut self, delay: Duration, event: TimerEvent) -> u64 {
        let mut world = self.world.borrow_mut();
        let id = world.next_timer;
        world.next_timer += 1;
        let order = world.next_order;
        world.next_order += 1;
        let at = world.now + delay;
        let node = self.node;
        world.events.push(Event {
            at,
            order,
            kind: EventKind::Timer { node, id, event },
        });
        id
    }

    fn cancel(&mut self, timer: u64) {
        self.world.borrow_mut().cancelled.insert(timer);
    }
}

pub struct VirtualIpv4 {
    world: Rc<RefCell<World>>,
    node: usize,
}

impl Ipv4Layer for VirtualIpv4 {
    fn interface_count(&self) -> u32 {
        self.world.borrow().node_ifaces[self.node].len() as u32
    }

    fn interface_address(&self, interface: u32) -> Option<Ipv4Addr> {
        let world = self.world.borrow();
        world.node_ifaces[self.node]
            .get(interface as usize)
            .and_then(|assigned| *assigned)
            .map(|(addr, _)| addr)
    }

    fn broadcast_address(&self, interface: u32) -> Option<Ipv4Addr> {
        let world = self.world.borrow();
        world.node_ifaces[self.node]
            .get(interface as usize)
            .and_then(|assigned| *assigned)
            .map(|(addr, mask)| Ipv4Addr::from(u32::from(addr) | !u32::from(mask)))
    }

    fn is_local_address(&self, addr: Ipv4Addr) -> bool {
        let world = self.world.borrow();
        world.node_ifaces[self.node]
            .iter()
            .flatten()
            .any(|(assigned, _)| *assigned == addr)
    }
}

pub struct VirtualMobility {
    state: Rc<RefCell<(Vector3, Vector3)>>,
}

impl Mobility for VirtualMobility {
    fn position(&self) -> Vector3 {
        self.state.borrow().0
    }
    fn velocity(&self) -> Vector3 {
        self.state.borrow().1
    }
}

/// Everything a node's trace sink saw, for assertions.
#[derive(Default)]
pub struct TraceRecords {
    pub rx: Vec<(PacketHeader, Vec<MessageHeader>)>,
    pub tx: Vec<(PacketHeader, Vec<MessageHeader>)>,
    pub table_changes: Vec<usize>,
}

pub struct RecordingTrace {
    records: Rc<RefCell<TraceRecords>>,
}

impl TraceSink for RecordingTrace {
    fn packet_rx(&mut self, header: &PacketHeader, messages: &[MessageHeader]) {
        self.records
            .borrow_mut()
            .rx
            .push((*header, messages.to_vec()));
    }
    fn packet_tx(&mut self, header: &PacketHeader, messages: &[MessageHeader]) {
        self.records
            .borrow_mut()
            .tx
            .push((*header, messages.to_vec()));
    }
    fn table_changed(&mut self, len: usize) {
        self.records.borrow_mut().table_changes.push(len);
    }
}

fn parse_cidr(s: &str) -> (Ipv4Addr, Ipv4Addr) {
    let (addr, prefix) = s.split_once('/').unwrap_or_else(|| panic!("bad cidr {s}"));
    let addr: Ipv4Addr = addr.parse().unwrap_or_else(|_| panic!("bad address {s}"));
    let prefix: u32 = prefix.parse().unwrap_or_else(|_| panic!("bad prefix {s}"));
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    };
    (addr, Ipv4Addr::from(mask))
}

impl VirtualVanet {
    pub fn new() -> VirtualVanet {
        VirtualVanet {
            routers: Vec::new(),
            world: Rc::new(RefCell::new(World::default())),
            traces: Vec::new(),
            motions: Vec::new(),
        }
    }

    /// Builds fully-booted nodes: every node gets the listed interfaces
    /// ("a.b.c.d/len", empty string for an unaddressed interface), its
    /// main interface is 0 and all interfaces are up.
    pub fn create(nodes: &[&[&str]]) -> VirtualVanet {
        let mut net = VirtualVanet::new();
        for ifaces in nodes {
            let node = net.add_node(ifaces);
            net.boot(node);
        }
        net
    }

    /// Adds an unbooted node and returns its index (also its node id).
    pub fn add_node(&mut self, ifaces: &[&str]) -> usize {
        let node = self.routers.len();
        let assigned: Vec<Option<(Ipv4Addr, Ipv4Addr)>> = ifaces
            .iter()
            .map(|s| if s.is_empty() { None } else { Some(parse_cidr(s)) })
            .collect();
        self.world.borrow_mut().node_ifaces.push(assigned);

        let records = Rc::new(RefCell::new(TraceRecords::default()));
        let motion = Rc::new(RefCell::new((Vector3::default(), Vector3::default())));
        let router = Router::new(
            node as u32,
            ProtocolConfig::default(),
            VirtualTransport {
                world: self.world.clone(),
                node,
            },
            VirtualClock {
                world: self.world.clone(),
                node,
            },
            VirtualIpv4 {
                world: self.world.clone(),
                node,
            },
            VirtualMobility {
                state: motion.clone(),
            },
            RecordingTrace {
                records: records.clone(),
            },
        );
        self.routers.push(router);
        self.traces.push(records);
        self.motions.push(motion);
        node
    }

    /// Standard bringup: main interface 0, initialize, all interfaces up.
    pub fn boot(&mut self, node: usize) {
        let router = &mut self.routers[node];
        router
            .set_main_interface(0)
            .unwrap_or_else(|e| panic!("node {node}: {e}"));
        router
            .initialize()
            .unwrap_or_else(|e| panic!("node {node}: {e}"));
        let count = router.ipv4.interface_count();
        for interface in 0..count {
            router.notify_interface_up(interface);
        }
    }

    pub fn now(&self) -> Duration {
        self.world.borrow().now
    }

    /// Delivers every event due up to and including `t`, then parks the
    /// clock at `t`.
    pub fn run_until(&mut self, t: Duration) {
        loop {
            let next = {
                let mut world = self.world.borrow_mut();
                match world.events.peek() {
                    Some(event) if event.at <= t => {
                        let event = world.events.pop().unwrap();
                        world.now = event.at;
                        if let EventKind::Timer { id, .. } = event.kind {
                            if world.cancelled.remove(&id) {
                                continue;
                            }
                        }
                        event
                    }
                    _ => break,
                }
            };
            match next.kind {
                EventKind::Timer { node, event, .. } => self.routers[node].timer_expired(event),
                EventKind::Deliver {
                    node,
                    interface,
                    frame,
                } => self.routers[node].receive(&frame, interface),
            }
        }
        self.world.borrow_mut().now = t;
    }

    pub fn run_for(&mut self, d: Duration) {
        let t = self.now() + d;
        self.run_until(t);
    }

    /// While set, every sent frame vanishes.
    pub fn set_drop_frames(&mut self, drop: bool) {
        self.world.borrow_mut().drop_frames = drop;
    }

    pub fn set_motion(&mut self, node: usize, position: Vector3, velocity: Vector3) {
        *self.motions[node].borrow_mut() = (position, velocity);
    }

    /// Assigns an address to an interface after the fact, as a host stack
    /// would on late configuration.
    pub fn assign_address(&mut self, node: usize, interface: u32, cidr: &str) {
        let assigned = parse_cidr(cidr);
        self.world.borrow_mut().node_ifaces[node][interface as usize] = Some(assigned);
    }

    pub fn trace(&self, node: usize) -> Ref<'_, TraceRecords> {
        self.traces[node].borrow()
    }

    /// Number of sockets the node currently has bound.
    pub fn socket_count(&self, node: usize) -> usize {
        self.world
            .borrow()
            .sockets
            .iter()
            .filter(|reg| reg.node == node)
            .count()
    }

    pub fn get_next_hop(&self, node: usize, dest: &str) -> String {
        let dest: Ipv4Addr = dest.parse().unwrap_or_else(|_| panic!("bad address {dest}"));
        let route = self.routers[node]
            .route_output(dest)
            .unwrap_or_else(|e| panic!("node {node} has no route to {dest}: {e}"));
        route.next_hop.to_string()
    }
}
