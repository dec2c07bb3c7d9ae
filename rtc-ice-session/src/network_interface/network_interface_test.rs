use super::*;
use std::net::{IpAddr, Ipv4Addr};

#[test]
fn test_static_interfaces() -> Result<()> {
    let mut ni = NetworkInterface::from_entries(vec![
        InterfaceEntry::new("lo", IpAddr::V4(Ipv4Addr::LOCALHOST)),
        InterfaceEntry::new("eth0", "192.168.1.10".parse().unwrap()),
    ]);
    ni.update_network_interfaces()?;

    assert!(ni.is_any_network_interface_up());
    assert!(!ni.is_multi_homed(), "loopback must not count");
    assert_eq!(ni.live_interfaces().len(), 2);
    assert_eq!(ni.live_interfaces()[1].family(), AddressFamily::V4);

    Ok(())
}

#[test]
fn test_vpn_detection() -> Result<()> {
    let vpn_addr: IpAddr = "10.8.0.2".parse().unwrap();
    let mut ni = NetworkInterface::from_entries(vec![
        InterfaceEntry::new("eth0", "192.168.1.10".parse().unwrap()),
        InterfaceEntry::new("tun0", vpn_addr),
        InterfaceEntry::new("wlan0", "fe80::1".parse().unwrap()),
    ]);
    ni.update_network_interfaces()?;

    let tests = vec![
        ("tun0", true),
        ("utun3", true),
        ("wg0", true),
        ("ppp0", true),
        ("eth0", false),
        ("wlan0", false),
    ];
    for (name, expected) in tests {
        assert_eq!(
            is_vpn_interface_name(name),
            expected,
            "vpn detection for {name}"
        );
    }

    assert!(ni.is_multi_homed());
    assert!(ni.is_vpn(vpn_addr));
    assert!(!ni.is_vpn("192.168.1.10".parse().unwrap()));

    Ok(())
}

#[test]
fn test_loopback_only_is_down() -> Result<()> {
    let mut ni = NetworkInterface::from_entries(vec![InterfaceEntry::new(
        "lo",
        IpAddr::V4(Ipv4Addr::LOCALHOST),
    )]);
    ni.update_network_interfaces()?;
    assert!(!ni.is_any_network_interface_up());
    Ok(())
}
