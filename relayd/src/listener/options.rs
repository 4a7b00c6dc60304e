//! Socket options derived from a listener's configuration.

use crate::config::ListenerConfig;
use relayd_net::options::{
    ip_freebind_options, ip_packet_info_options, ip_transparent_options, literal_options,
    reuse_port_options, rx_queue_overflow_options, udp_gro_options, udp_gro_supported,
};
use relayd_net::{SocketOptions, SocketType};

/// Options every listen socket of `config` is created with.
///
/// Datagram listeners additionally ask for the destination address of each
/// datagram, receive-queue overflow counts and, where available, UDP GRO.
/// Unix-domain listeners always share one socket, so `reuse_port` is ignored
/// for them.
pub fn build_listen_socket_options(config: &ListenerConfig) -> SocketOptions {
    let mut options = SocketOptions::new();

    if config.transparent {
        options.extend(ip_transparent_options());
    }
    if config.freebind {
        options.extend(ip_freebind_options());
    }
    if config.reuse_port && !config.address.is_pipe() {
        options.extend(reuse_port_options());
    }
    if !config.socket_options.is_empty() {
        options.extend(literal_options(&config.socket_options));
    }
    if config.socket_type == SocketType::Datagram {
        options.extend(ip_packet_info_options());
        options.extend(rx_queue_overflow_options());
        if udp_gro_supported() {
            options.extend(udp_gro_options());
        }
    }

    options
}
