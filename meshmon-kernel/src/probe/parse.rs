//! Loose parsers for ping and iperf reports.
//!
//! Reports come from the local ping binary (Linux, BSD/macOS or Windows
//! wording) or from a mesh node's test endpoints, so every pattern is searched
//! anywhere in the text rather than anchored to a line layout.

use regex::Regex;
use std::sync::LazyLock;

use super::{LatencyResult, ThroughputResult};

static UNIX_LOSS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)%\s*packet loss").expect("loss regex is valid"));

static WINDOWS_LOSS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((\d+)%\s*loss\)").expect("windows loss regex is valid"));

// Linux says "rtt", BSD and busybox say "round-trip"; the trailing mdev/stddev field is optional
static UNIX_RTT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:rtt|round-trip)\s+min/avg/max(?:/\S+)?\s*=\s*([\d.]+)/([\d.]+)/([\d.]+)")
        .expect("rtt regex is valid")
});

static WINDOWS_RTT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Minimum\s*=\s*(\d+)ms,\s*Maximum\s*=\s*(\d+)ms,\s*Average\s*=\s*(\d+)ms")
        .expect("windows rtt regex is valid")
});

static REPLY_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time[=<]\s*([\d.]+)\s*ms").expect("reply time regex is valid"));

// fping, as run by a node's /cgi-bin/ping: "host : xmt/rcv/%loss = 5/5/0%, min/avg/max = 1.23/2.34/3.45"
static FPING_LOSS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"xmt/rcv/%loss\s*=\s*\d+/\d+/(\d+(?:\.\d+)?)%").expect("fping loss regex is valid")
});

static ANY_LOSS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)\s*%\s*(?:packet\s+)?loss").expect("loose loss regex is valid")
});

static BARE_RTT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"min/avg/max(?:/\S+)?\s*=\s*([\d.]+)/([\d.]+)/([\d.]+)").expect("bare rtt regex is valid")
});

static BITRATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d.]+)\s*([GMK])bits/sec").expect("bitrate regex is valid"));

/// Extracts timing and loss from a ping report.
///
/// `count` is the number of packets sent; with a single packet and no summary
/// line the per-reply `time=` figure fills all three timings. `None` means
/// nothing recognisable was found.
pub fn parse_ping_output(output: &str, count: u32) -> Option<LatencyResult> {
    let loss = UNIX_LOSS
        .captures(output)
        .or_else(|| WINDOWS_LOSS.captures(output))
        .and_then(|c| c[1].parse::<f64>().ok());

    let timings = if let Some(c) = UNIX_RTT.captures(output) {
        Some((num(&c[1]), num(&c[2]), num(&c[3])))
    } else if let Some(c) = WINDOWS_RTT.captures(output) {
        // Windows orders the summary min, max, avg
        Some((num(&c[1]), num(&c[3]), num(&c[2])))
    } else if count == 1 {
        REPLY_TIME.captures(output).map(|c| {
            let t = num(&c[1]);
            (t, t, t)
        })
    } else {
        None
    };

    match (timings, loss) {
        (None, None) => None,
        (_, Some(loss)) if loss >= 100.0 => Some(LatencyResult::total_loss()),
        (Some((min, avg, max)), loss) => Some(LatencyResult { min, avg, max, loss: loss.unwrap_or(0.0) }),
        // a loss line without timings means the stats never made it out
        (None, Some(_)) => Some(LatencyResult::total_loss()),
    }
}

/// Extracts timing and loss from a node's proxied ping report.
///
/// Nodes run fping, but plain ping wording is accepted too. A report that only
/// says the target answered gives zero loss with no timings. `None` means the
/// node reported an error or nothing recognisable.
pub fn parse_proxy_ping_output(output: &str) -> Option<LatencyResult> {
    let lowered = output.to_lowercase();
    if lowered.contains("error") || lowered.contains("unknown host") {
        return None;
    }

    let loss = FPING_LOSS
        .captures(output)
        .or_else(|| ANY_LOSS.captures(output))
        .and_then(|c| c[1].parse::<f64>().ok());
    if loss.is_some_and(|l| l >= 100.0) {
        return Some(LatencyResult::total_loss());
    }

    let timings = if let Some(c) = BARE_RTT.captures(output) {
        Some((num(&c[1]), num(&c[2]), num(&c[3])))
    } else {
        WINDOWS_RTT.captures(output).map(|c| (num(&c[1]), num(&c[3]), num(&c[2])))
    };
    match timings {
        Some((min, avg, max)) => Some(LatencyResult { min, avg, max, loss: loss.unwrap_or(0.0) }),
        None if lowered.contains("alive") || lowered.contains("bytes from") => {
            Some(LatencyResult { min: None, avg: None, max: None, loss: 0.0 })
        }
        None => None,
    }
}

/// Averages every bit-rate figure in an iperf report, in Mbit/s
pub fn parse_iperf_output(output: &str) -> Option<ThroughputResult> {
    let lowered = output.to_lowercase();
    if lowered.contains("server error") || lowered.contains("no such server") {
        return None;
    }

    let rates: Vec<f64> = BITRATE
        .captures_iter(output)
        .filter_map(|c| {
            let value = c[1].parse::<f64>().ok()?;
            Some(match &c[2] {
                "G" => value * 1000.0,
                "K" => value / 1000.0,
                _ => value,
            })
        })
        .collect();

    if rates.is_empty() {
        return None;
    }
    let avg = rates.iter().sum::<f64>() / rates.len() as f64;
    let avg = (avg * 100.0).round() / 100.0;
    Some(ThroughputResult { tx_mbps: avg, rx_mbps: avg })
}

fn num(s: &str) -> Option<f64> {
    s.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINUX: &str = "PING 10.0.0.2 (10.0.0.2) 56(84) bytes of data.\n\
        64 bytes from 10.0.0.2: icmp_seq=1 ttl=64 time=10.0 ms\n\n\
        --- 10.0.0.2 ping statistics ---\n\
        5 packets transmitted, 4 received, 20% packet loss, time 4005ms\n\
        rtt min/avg/max/mdev = 10.0/15.0/20.0/2.0 ms\n";

    #[test]
    fn test_linux_summary() {
        let r = parse_ping_output(LINUX, 5).unwrap();
        assert_eq!(r, LatencyResult { min: Some(10.0), avg: Some(15.0), max: Some(20.0), loss: 20.0 });
    }

    #[test]
    fn test_busybox_summary() {
        let out = "3 packets transmitted, 3 packets received, 0% packet loss\n\
                   round-trip min/avg/max = 1.201/2.442/4.010 ms\n";
        let r = parse_ping_output(out, 3).unwrap();
        assert_eq!(r.min, Some(1.201));
        assert_eq!(r.max, Some(4.010));
        assert_eq!(r.loss, 0.0);
    }

    #[test]
    fn test_windows_summary() {
        let out = "Packets: Sent = 4, Received = 4, Lost = 0 (0% loss),\n\
                   Approximate round trip times in milli-seconds:\n\
                   Minimum = 1ms, Maximum = 9ms, Average = 4ms\n";
        let r = parse_ping_output(out, 4).unwrap();
        assert_eq!(r, LatencyResult { min: Some(1.0), avg: Some(4.0), max: Some(9.0), loss: 0.0 });
    }

    #[test]
    fn test_single_reply_inline_time() {
        let out = "Reply from 10.0.0.2: bytes=32 time<1ms TTL=64\n";
        let r = parse_ping_output(out, 1).unwrap();
        assert_eq!(r.avg, Some(1.0));
        assert_eq!(r.loss, 0.0);
        assert!(parse_ping_output(out, 5).is_none());
    }

    #[test]
    fn test_total_loss_and_garbage() {
        let out = "2 packets transmitted, 0 received, 100% packet loss, time 1001ms\n";
        assert_eq!(parse_ping_output(out, 2), Some(LatencyResult::total_loss()));
        assert_eq!(parse_ping_output("ping: unknown host zulu", 2), None);
    }

    #[test]
    fn test_loss_without_timings_is_total_loss() {
        let out = "5 packets transmitted, 4 received, 20% packet loss, time 4005ms\n";
        assert_eq!(parse_ping_output(out, 5), Some(LatencyResult::total_loss()));
    }

    #[test]
    fn test_fping_report() {
        let out = "bravo.local.mesh : xmt/rcv/%loss = 5/4/20%, min/avg/max = 1.23/2.34/3.45\n";
        let r = parse_proxy_ping_output(out).unwrap();
        assert_eq!(r, LatencyResult { min: Some(1.23), avg: Some(2.34), max: Some(3.45), loss: 20.0 });

        let down = "zulu.local.mesh : xmt/rcv/%loss = 5/0/100%\n";
        assert_eq!(parse_proxy_ping_output(down), Some(LatencyResult::total_loss()));
    }

    #[test]
    fn test_proxy_report_fallbacks() {
        let r = parse_proxy_ping_output(LINUX).unwrap();
        assert_eq!(r.avg, Some(15.0));
        assert_eq!(r.loss, 20.0);

        let alive = parse_proxy_ping_output("bravo.local.mesh is alive\n").unwrap();
        assert_eq!((alive.avg, alive.loss), (None, 0.0));

        assert_eq!(parse_proxy_ping_output("ping: unknown host zulu"), None);
        assert_eq!(parse_proxy_ping_output("<pre>Error: no server given</pre>"), None);
        assert_eq!(parse_proxy_ping_output(""), None);
    }

    #[test]
    fn test_iperf_averages_units() {
        let out = "[  5]   0.00-5.00   sec  6.25 MBytes  10.0 Mbits/sec  sender\n\
                   [  5]   0.00-5.00   sec  6.10 MBytes  0.02 Gbits/sec  receiver\n\
                   [  5]   0.00-5.00   sec  1 KBytes  500 Kbits/sec\n";
        let r = parse_iperf_output(out).unwrap();
        assert_eq!(r.tx_mbps, 10.17);
        assert_eq!(r.rx_mbps, r.tx_mbps);
    }

    #[test]
    fn test_iperf_errors() {
        assert!(parse_iperf_output("SERVER ERROR: busy").is_none());
        assert!(parse_iperf_output("iperf: no such server").is_none());
        assert!(parse_iperf_output("nothing to see").is_none());
    }
}
