//! Protocol probe: classifies a freshly accepted connection from its first
//! bytes without consuming them, grounded on
//! `original_source/src/core/probe.c`'s `probe_net_event`/`probe_handle_http`.

/// Number of bytes peeked from the socket before classification.
pub const PROBE_PEEK_SIZE: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeVerdict {
    Adc,
    Tls,
    Http,
    Irc,
    Unknown,
}

const HTTP_METHODS: &[&str] = &["GET ", "PUT ", "POST ", "PATCH ", "HEAD ", "OPTIONS ", "DELETE "];

/// Classifies up to [`PROBE_PEEK_SIZE`] bytes peeked from the socket.
/// Mirrors `probe_net_event`'s `memcmp` cascade: ADC, then TLS
/// ClientHello, then HTTP methods, then the IRC `NICK` greeting.
pub fn classify(buf: &[u8]) -> ProbeVerdict {
    if buf.len() >= 4 && &buf[0..4] == b"HSUP" {
        return ProbeVerdict::Adc;
    }
    if buf.len() >= 11 && buf[0] == 22 && buf[1] == 3 && buf[5] == 1 && buf[9] == buf[1] {
        return ProbeVerdict::Tls;
    }
    if HTTP_METHODS.iter().any(|m| buf.len() >= m.len() && buf[..m.len()] == *m.as_bytes()) {
        return ProbeVerdict::Http;
    }
    if buf.len() >= 4 && &buf[0..4] == b"NICK" {
        return ProbeVerdict::Irc;
    }
    ProbeVerdict::Unknown
}

/// The NMDC redirect banner sent on probe timeout, when configured. The
/// literal `<hub>` pseudo-nick is the original's own convention for a
/// server-originated NMDC chat line, not the hub's configured name.
pub fn nmdc_redirect_banner(addr: &str) -> String {
    format!("<hub> Redirecting...|$ForceMove {addr}|")
}

/// Preamble an ADC client receives when it connects without TLS and the
/// hub requires it, followed by the redirect itself. `AAAB` is a fixed
/// placeholder SID, never actually allocated from the pool, matching the
/// original's hardcoded `"ISID AAAB"` for a client that is rejected before
/// ever joining the user index.
pub fn tls_require_redirect(isup_features: &[&str], addr: &str) -> String {
    let mut features = String::from("ADBAS0");
    for f in isup_features {
        features.push(' ');
        features.push_str("AD");
        features.push_str(f);
    }
    format!("ISUP {features}\nISID AAAB\nIINF NIRedirecting...\nIQUI AAAB RD{addr}\n")
}

/// `HTTP/1.1 307 Temporary Redirect` body, reproduced byte-for-byte from
/// `probe_handle_http`'s `fmt` template.
pub fn http_redirect(addr: &str) -> String {
    let body = format!(
        "<html>\r\n\
         <head><title>307 Temporary Redirect</title></head>\r\n\
         <body>\r\n\
         <center><h1>307 Temporary Redirect</h1></center>\r\n\
         <hr><center><a href=\"{addr}\">Redirect</a></center>\r\n\
         </body>\r\n\
         </html>\r\n"
    );
    format!(
        "HTTP/1.1 307 Temporary Redirect\r\n\
         Connection: close\r\n\
         Location: {addr}\r\n\
         Content-Type: text/html; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {body}",
        body.len()
    )
}

/// `HTTP/1.1 501 Not Implemented` body, reproduced byte-for-byte from
/// `probe_handle_http`'s fallback branch.
pub fn http_not_implemented() -> &'static str {
    "HTTP/1.1 501 Not Implemented\r\n\
     Connection: close\r\n\
     Content-Type: text/html; charset=utf-8\r\n\
     Content-Length: 136\r\n\
     \r\n\
     <html>\r\n\
     <head><title>501 Not Implemented</title></head>\r\n\
     <body>\r\n\
     <center><h1>501 Not Implemented</h1></center>\r\n\
     <hr>\r\n\
     </body>\r\n\
     </html>\r\n"
}
