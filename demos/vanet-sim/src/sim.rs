use sdn::concepts::message::Vector3;
use sdn::framework::{
    Clock, Ipv4Layer, Mobility, ProtocolConfig, RoutingSystem, TimerEvent, Transport,
};
use sdn::router::Router;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap, HashSet};
use std::io;
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;

const LATENCY: Duration = Duration::from_millis(2);

/// the address node `n` gets on the shared 10.1.1.0/24 cell
pub fn node_addr(node: usize) -> Ipv4Addr {
    Ipv4Addr::new(10, 1, 1, node as u8 + 1)
}

/// One radio cell on 10.1.1.0/24. Every broadcast frame reaches every
/// other bound node after a fixed latency; virtual time only moves inside
/// `run_until`.
pub struct Cell {
    pub routers: Vec<Router<Cell>>,
    world: Rc<RefCell<World>>,
}

impl RoutingSystem for Cell {
    type Socket = CellSocket;
    type TimerHandle = u64;
    type Transport = CellTransport;
    type Clock = CellClock;
    type Ipv4Layer = CellIpv4;
    type Mobility = CellMobility;
    type Trace = ();
}

#[derive(Default)]
struct World {
    now: Duration,
    next_order: u64,
    next_timer: u64,
    cancelled: HashSet<u64>,
    events: BinaryHeap<Event>,
    bound: BTreeSet<usize>,
    motion: Vec<Motion>,
    frames_sent: u64,
    bytes_sent: u64,
}

struct Motion {
    position: [f32; 3],
    velocity: [f32; 3],
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

pub struct CellSocket;

pub struct CellTransport {
    world: Rc<RefCell<World>>,
    node: usize,
}

impl Transport<Cell> for CellTransport {
    fn open(&mut self, _interface: u32, _local: Ipv4Addr, _port: u16) -> io::Result<CellSocket> {
        self.world.borrow_mut().bound.insert(self.node);
        Ok(CellSocket)
    }

    fn send_to(&mut self, _socket: &mut CellSocket, frame: &[u8], _dest: Ipv4Addr, _port: u16) {
        let mut world = self.world.borrow_mut();
        world.frames_sent += 1;
        world.bytes_sent += frame.len() as u64;
        let at = world.now + LATENCY;
        let sender = self.node;
        let targets: Vec<usize> = world
            .bound
            .iter()
            .copied()
            .filter(|node| *node != sender)
            .collect();
        for node in targets {
            let order = world.next_order;
            world.next_order += 1;
            world.events.push(Event {
                at,
                order,
                kind: EventKind::Deliver {
                    node,
                    frame: frame.to_vec(),
                },
            });
        }
    }

    fn close(&mut self, _socket: CellSocket) {
        self.world.borrow_mut().bound.remove(&self.node);
    }
}

pub struct CellClock {
    world: Rc<RefCell<World>>,
    node: usize,
}

impl Clock<Cell> for CellClock {
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

pub struct CellIpv4 {
    node: usize,
}

impl Ipv4Layer for CellIpv4 {
    fn interface_count(&self) -> u32 {
        1
    }
    fn interface_address(&self, interface: u32) -> Option<Ipv4Addr> {
        (interface == 0).then(|| node_addr(self.node))
    }
    fn broadcast_address(&self, interface: u32) -> Option<Ipv4Addr> {
        (interface == 0).then(|| Ipv4Addr::new(10, 1, 1, 255))
    }
    fn is_local_address(&self, addr: Ipv4Addr) -> bool {
        addr == node_addr(self.node)
    }
}

pub struct CellMobility {
    world: Rc<RefCell<World>>,
    node: usize,
}

impl Mobility for CellMobility {
    fn position(&self) -> Vector3 {
        let world = self.world.borrow();
        let m = &world.motion[self.node];
        Vector3::new(m.position[0], m.position[1], m.position[2])
    }
    fn velocity(&self) -> Vector3 {
        let world = self.world.borrow();
        let m = &world.motion[self.node];
        Vector3::new(m.velocity[0], m.velocity[1], m.velocity[2])
    }
}

impl Cell {
    pub fn new() -> Cell {
        Cell {
            routers: Vec::new(),
            world: Rc::new(RefCell::new(World::default())),
        }
    }

    /// Adds a node at `position` moving at `velocity` metres per second.
    /// Its index doubles as its id; its address is 10.1.1.(index + 1).
    pub fn add_node(
        &mut self,
        config: ProtocolConfig,
        position: [f32; 3],
        velocity: [f32; 3],
    ) -> usize {
        let node = self.routers.len();
        self.world.borrow_mut().motion.push(Motion { position, velocity });
        let router = Router::new(
            node as u32,
            config,
            CellTransport {
                world: self.world.clone(),
                node,
            },
            CellClock {
                world: self.world.clone(),
                node,
            },
            CellIpv4 { node },
            CellMobility {
                world: self.world.clone(),
                node,
            },
            (),
        );
        self.routers.push(router);
        node
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
                EventKind::Deliver { node, frame } => self.routers[node].receive(&frame, 0),
            }
        }
        self.world.borrow_mut().now = t;
    }

    pub fn run_for(&mut self, d: Duration) {
        let t = self.now() + d;
        self.run_until(t);
    }

    /// Integrates every node's position forward by `dt`.
    pub fn advance_motion(&mut self, dt: Duration) {
        let secs = dt.as_secs_f32();
        for m in &mut self.world.borrow_mut().motion {
            for axis in 0..3 {
                m.position[axis] += m.velocity[axis] * secs;
            }
        }
    }

    /// total frames and bytes the cell has carried
    pub fn stats(&self) -> (u64, u64) {
        let world = self.world.borrow();
        (world.frames_sent, world.bytes_sent)
    }
}
