//! Address resolution for host/port pairs.
//!
//! Lookups go through `getaddrinfo(3)` restricted to IPv4 stream endpoints.

use std::ffi::{CStr, CString};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::{mem, ptr};

use crate::error::{Error, Result};
use crate::net::sys;

/// Resolves `host` and `port` into zero or more connectable IPv4 endpoints,
/// in resolver order.
///
/// `port` may be numeric or a service name (e.g. `"http"`).
///
/// # Errors
///
/// Returns [Error::Resolution] if either string contains an interior null
/// byte or the lookup fails.
pub fn resolve(host: &str, port: &str) -> Result<Vec<SocketAddrV4>> {
    let resolution_err = |reason: String| Error::Resolution {
        host: host.to_string(),
        port: port.to_string(),
        reason,
    };

    let c_host =
        CString::new(host).map_err(|_| resolution_err("host contains a null byte".into()))?;
    let c_port =
        CString::new(port).map_err(|_| resolution_err("port contains a null byte".into()))?;

    let addrs = getaddrinfo(Some(&c_host), Some(&c_port), 0).map_err(resolution_err)?;

    Ok(addrs)
}

/// Resolves `host`/`port` and returns the first endpoint.
///
/// # Errors
///
/// Returns [Error::Resolution] if the lookup fails or yields no IPv4 address.
pub fn resolve_first(host: &str, port: &str) -> Result<SocketAddrV4> {
    resolve(host, port)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::Resolution {
            host: host.to_string(),
            port: port.to_string(),
            reason: "no IPv4 address found".into(),
        })
}

/// Returns the first non-loopback IPv4 address assigned to this host's name.
///
/// # Errors
///
/// Returns an error if the host name cannot be read or resolved, or if it
/// resolves only to loopback addresses.
pub fn local_ip() -> Result<Ipv4Addr> {
    let mut name = [0 as libc::c_char; 256];

    if unsafe { libc::gethostname(name.as_mut_ptr(), name.len()) } == -1 {
        return Err(Error::Io(crate::error::errno!("gethostname() failed")));
    }
    // Truncated names are not guaranteed to be terminated.
    name[name.len() - 1] = 0;

    // SAFETY: `name` is null-terminated.
    let hostname = unsafe { CStr::from_ptr(name.as_ptr()) };

    let resolution_err = |reason: String| Error::Resolution {
        host: hostname.to_string_lossy().into_owned(),
        port: String::new(),
        reason,
    };

    getaddrinfo(Some(hostname), None, libc::AI_CANONNAME)
        .map_err(resolution_err)?
        .into_iter()
        .map(|addr| *addr.ip())
        .find(|ip| !ip.is_loopback())
        .ok_or_else(|| resolution_err("no non-loopback IPv4 address found".into()))
}

fn getaddrinfo(
    host: Option<&CStr>,
    port: Option<&CStr>,
    flags: libc::c_int,
) -> std::result::Result<Vec<SocketAddrV4>, String> {
    let mut hints: libc::addrinfo = unsafe { mem::zeroed() };
    hints.ai_family = libc::AF_INET;
    hints.ai_socktype = libc::SOCK_STREAM;
    hints.ai_flags = flags;

    let mut res: *mut libc::addrinfo = ptr::null_mut();

    let rc = unsafe {
        libc::getaddrinfo(
            host.map_or(ptr::null(), CStr::as_ptr),
            port.map_or(ptr::null(), CStr::as_ptr),
            &raw const hints,
            &raw mut res,
        )
    };
    if rc != 0 {
        let reason = if rc == libc::EAI_SYSTEM {
            std::io::Error::last_os_error().to_string()
        } else {
            // SAFETY: `gai_strerror` returns a static, null-terminated string.
            unsafe { CStr::from_ptr(libc::gai_strerror(rc)) }
                .to_string_lossy()
                .into_owned()
        };
        return Err(reason);
    }

    let mut addrs = Vec::new();
    let mut cur = res;

    while !cur.is_null() {
        // SAFETY: `cur` is a node of the list returned by `getaddrinfo`.
        let info = unsafe { &*cur };

        if info.ai_family == libc::AF_INET && !info.ai_addr.is_null() {
            // SAFETY: `AF_INET` entries carry a `sockaddr_in`.
            let sin = unsafe { &*(info.ai_addr as *const libc::sockaddr_in) };
            let addr = sys::from_sockaddr(sin);

            if !addrs.contains(&addr) {
                addrs.push(addr);
            }
        }

        cur = info.ai_next;
    }

    unsafe { libc::freeaddrinfo(res) };

    Ok(addrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_numeric_host() {
        let addrs = resolve("127.0.0.1", "4200").unwrap();
        assert_eq!(
            addrs,
            vec![SocketAddrV4::new(Ipv4Addr::LOCALHOST, 4200)]
        );
    }

    #[test]
    fn resolve_first_numeric_host() {
        let addr = resolve_first("0.0.0.0", "0").unwrap();
        assert_eq!(addr, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
    }

    #[test]
    fn resolve_rejects_null_bytes() {
        let err = resolve("127.0.0\0.1", "80").unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
    }

    #[test]
    fn resolve_rejects_bad_port() {
        let err = resolve("127.0.0.1", "not-a-port-name").unwrap_err();
        match err {
            Error::Resolution { host, port, .. } => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(port, "not-a-port-name");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
