//! AF_XDP transmit backend: a UMEM frame pool and a TX ring egress bound to one
//! interface queue.

mod iface;
mod mmap;
mod port;
mod ring;

pub use iface::{if_index_by_name, mac_by_ifindex};
pub use port::{UmemPool, XdpConfig, XdpFrame, XdpTx, create_tx_port};
pub use ring::{FRAME_COUNT, FRAME_SIZE, TX_RING_SIZE};
