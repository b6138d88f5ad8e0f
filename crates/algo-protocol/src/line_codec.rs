// crates/algo-protocol/src/line_codec.rs

//! Line codec.
//!
//! Requests (client -> server):
//!
//! - Spawn:   `S, name, token, {json params}`
//! - Modify:  `M, id|token, {json params}`
//! - Stop:    `X` (all), `X, id|token`, `X, sec, securityId`
//! - Query:   `Q` or `Q, id|token`
//! - History: `L, seq0`
//!
//! Feed and order-adapter injection (for simulators and tests):
//!
//! - Trade:        `T, src, sec, price, qty`
//! - Quote:        `B, src, sec, bidPrice, bidSize, askPrice, askSize`
//! - Confirmation: `F, orderId, execType, qty, price[, text]`
//!
//! Replies (server -> client):
//!
//! - Spawned:    `A, id, token`
//! - Ack:        `K, text`
//! - Error:      `E, reason`
//! - Algo row:   `I, id, token, name, user, active(1/0)`
//! - Instrument: `P, id, src, sec, bought, sold, outstandingBuy, outstandingSell`
//! - Record:     `R, {json record}`
//! - End:        `Z, rows`
//!
//! The last field of `S`, `M`, `K`, `E` and `R` is taken verbatim, commas
//! included.

use algo_core::{AlgoRef, Confirmation, DataSrc, ExecType, Exposure, Quote, Record, SecurityId};

use crate::messages::{ClientRequest, ProtocolError, ServerReply, StopTarget};

/// Parse one request line. Blank lines and `#` comments give `Ok(None)`.
pub fn parse_request(line: &str) -> Result<Option<ClientRequest>, ProtocolError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let kind = message_kind(trimmed)?;
    let request = match kind {
        'S' => {
            let tokens = split_n(trimmed, 4);
            if tokens.len() < 3 {
                return Err(field_count('S', 4, tokens.len()));
            }
            let name = non_empty("name", &tokens[1])?;
            ClientRequest::Spawn {
                name,
                token: tokens[2].clone(),
                params: tokens.get(3).cloned().unwrap_or_default(),
            }
        }
        'M' => {
            let tokens = split_n(trimmed, 3);
            if tokens.len() != 3 {
                return Err(field_count('M', 3, tokens.len()));
            }
            ClientRequest::Modify {
                algo: parse_algo_ref(&tokens[1])?,
                params: tokens[2].clone(),
            }
        }
        'X' => {
            let tokens = split_and_trim(trimmed, ',');
            match tokens.len() {
                1 => ClientRequest::Stop(StopTarget::All),
                2 => ClientRequest::Stop(StopTarget::Algo(parse_algo_ref(&tokens[1])?)),
                3 if tokens[1] == "sec" => {
                    let sec = parse_u32("security", &tokens[2])?;
                    ClientRequest::Stop(StopTarget::Security(SecurityId(sec)))
                }
                n => return Err(field_count('X', 2, n)),
            }
        }
        'Q' => {
            let tokens = split_and_trim(trimmed, ',');
            match tokens.len() {
                1 => ClientRequest::Query(None),
                2 => ClientRequest::Query(Some(parse_algo_ref(&tokens[1])?)),
                n => return Err(field_count('Q', 2, n)),
            }
        }
        'L' => {
            let tokens = split_and_trim(trimmed, ',');
            match tokens.len() {
                1 => ClientRequest::History { seq0: 0 },
                2 => ClientRequest::History {
                    seq0: tokens[1].parse().map_err(|_| invalid("seq0", &tokens[1]))?,
                },
                n => return Err(field_count('L', 2, n)),
            }
        }
        'T' => {
            let tokens = split_and_trim(trimmed, ',');
            if tokens.len() != 5 {
                return Err(field_count('T', 5, tokens.len()));
            }
            ClientRequest::Trade {
                src: parse_src(&tokens[1])?,
                sec: SecurityId(parse_u32("security", &tokens[2])?),
                price: parse_f64("price", &tokens[3])?,
                qty: parse_f64("qty", &tokens[4])?,
            }
        }
        'B' => {
            let tokens = split_and_trim(trimmed, ',');
            if tokens.len() != 7 {
                return Err(field_count('B', 7, tokens.len()));
            }
            ClientRequest::Quote {
                src: parse_src(&tokens[1])?,
                sec: SecurityId(parse_u32("security", &tokens[2])?),
                quote: Quote {
                    bid_price: parse_f64("bid price", &tokens[3])?,
                    bid_size: parse_f64("bid size", &tokens[4])?,
                    ask_price: parse_f64("ask price", &tokens[5])?,
                    ask_size: parse_f64("ask size", &tokens[6])?,
                },
            }
        }
        'F' => {
            let tokens = split_n(trimmed, 6);
            if tokens.len() < 5 {
                return Err(field_count('F', 6, tokens.len()));
            }
            let order_id = tokens[1]
                .parse::<u64>()
                .map_err(|_| invalid("order id", &tokens[1]))?;
            let exec_type = tokens[2]
                .parse::<ExecType>()
                .map_err(|_| invalid("exec type", &tokens[2]))?;
            ClientRequest::Confirm(Confirmation {
                order_id,
                exec_type,
                qty: parse_f64("qty", &tokens[3])?,
                price: parse_f64("price", &tokens[4])?,
                text: tokens.get(5).cloned().unwrap_or_default(),
            })
        }
        other => return Err(ProtocolError::UnknownMessageType(other.to_string())),
    };
    Ok(Some(request))
}

pub fn format_request(request: &ClientRequest) -> String {
    match request {
        ClientRequest::Spawn {
            name,
            token,
            params,
        } => format!("S, {}, {}, {}", name, token, params),
        ClientRequest::Modify { algo, params } => {
            format!("M, {}, {}", algo_ref_field(algo), params)
        }
        ClientRequest::Stop(StopTarget::All) => "X".to_string(),
        ClientRequest::Stop(StopTarget::Algo(algo)) => format!("X, {}", algo_ref_field(algo)),
        ClientRequest::Stop(StopTarget::Security(sec)) => format!("X, sec, {}", sec),
        ClientRequest::Query(None) => "Q".to_string(),
        ClientRequest::Query(Some(algo)) => format!("Q, {}", algo_ref_field(algo)),
        ClientRequest::History { seq0 } => format!("L, {}", seq0),
        ClientRequest::Trade {
            src,
            sec,
            price,
            qty,
        } => format!("T, {}, {}, {}, {}", src, sec, price, qty),
        ClientRequest::Quote { src, sec, quote } => format!(
            "B, {}, {}, {}, {}, {}, {}",
            src, sec, quote.bid_price, quote.bid_size, quote.ask_price, quote.ask_size
        ),
        ClientRequest::Confirm(cm) if cm.text.is_empty() => format!(
            "F, {}, {}, {}, {}",
            cm.order_id, cm.exec_type, cm.qty, cm.price
        ),
        ClientRequest::Confirm(cm) => format!(
            "F, {}, {}, {}, {}, {}",
            cm.order_id,
            cm.exec_type,
            cm.qty,
            cm.price,
            single_line(&cm.text)
        ),
    }
}

pub fn format_reply(reply: &ServerReply) -> String {
    match reply {
        ServerReply::Spawned { id, token } => format!("A, {}, {}", id, token),
        ServerReply::Ack(text) => format!("K, {}", single_line(text)),
        ServerReply::Error(reason) => format!("E, {}", single_line(reason)),
        ServerReply::AlgoRow {
            id,
            token,
            name,
            user,
            active,
        } => format!(
            "I, {}, {}, {}, {}, {}",
            id,
            token,
            name,
            user,
            u8::from(*active)
        ),
        ServerReply::InstrumentRow {
            id,
            src,
            sec,
            exposure,
        } => format!(
            "P, {}, {}, {}, {}, {}, {}, {}",
            id,
            src,
            sec,
            exposure.bought_qty,
            exposure.sold_qty,
            exposure.outstanding_buy_qty,
            exposure.outstanding_sell_qty
        ),
        ServerReply::Record(record) => match serde_json::to_string(record) {
            Ok(json) => format!("R, {}", json),
            Err(e) => format!("E, cannot encode record {}: {}", record.seq, e),
        },
        ServerReply::End(rows) => format!("Z, {}", rows),
    }
}

/// Parse one reply line. Blank lines give `Ok(None)`.
pub fn parse_reply(line: &str) -> Result<Option<ServerReply>, ProtocolError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let kind = message_kind(trimmed)?;
    let reply = match kind {
        'A' => {
            let tokens = split_and_trim(trimmed, ',');
            if tokens.len() != 3 {
                return Err(field_count('A', 3, tokens.len()));
            }
            ServerReply::Spawned {
                id: parse_u32("algo id", &tokens[1])?,
                token: tokens[2].clone(),
            }
        }
        'K' => ServerReply::Ack(rest(trimmed)),
        'E' => ServerReply::Error(rest(trimmed)),
        'I' => {
            let tokens = split_and_trim(trimmed, ',');
            if tokens.len() != 6 {
                return Err(field_count('I', 6, tokens.len()));
            }
            ServerReply::AlgoRow {
                id: parse_u32("algo id", &tokens[1])?,
                token: tokens[2].clone(),
                name: tokens[3].clone(),
                user: tokens[4].clone(),
                active: tokens[5] == "1",
            }
        }
        'P' => {
            let tokens = split_and_trim(trimmed, ',');
            if tokens.len() != 8 {
                return Err(field_count('P', 8, tokens.len()));
            }
            ServerReply::InstrumentRow {
                id: parse_u32("algo id", &tokens[1])?,
                src: parse_src(&tokens[2])?,
                sec: SecurityId(parse_u32("security", &tokens[3])?),
                exposure: Exposure {
                    bought_qty: parse_f64("bought", &tokens[4])?,
                    sold_qty: parse_f64("sold", &tokens[5])?,
                    outstanding_buy_qty: parse_f64("outstanding buy", &tokens[6])?,
                    outstanding_sell_qty: parse_f64("outstanding sell", &tokens[7])?,
                },
            }
        }
        'R' => {
            let json = rest(trimmed);
            let record: Record = serde_json::from_str(&json).map_err(|_| invalid("record", &json))?;
            ServerReply::Record(record)
        }
        'Z' => {
            let tokens = split_and_trim(trimmed, ',');
            if tokens.len() != 2 {
                return Err(field_count('Z', 2, tokens.len()));
            }
            ServerReply::End(tokens[1].parse().map_err(|_| invalid("rows", &tokens[1]))?)
        }
        other => return Err(ProtocolError::UnknownMessageType(other.to_string())),
    };
    Ok(Some(reply))
}

// -----------------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------------

fn message_kind(line: &str) -> Result<char, ProtocolError> {
    let head = line.split(',').next().unwrap_or("").trim();
    let mut chars = head.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        (None, _) => Err(ProtocolError::Empty),
        _ => Err(ProtocolError::UnknownMessageType(head.to_string())),
    }
}

fn split_and_trim(s: &str, delimiter: char) -> Vec<String> {
    s.split(delimiter)
        .map(|tok| tok.trim().to_string())
        .collect()
}

/// Like [`split_and_trim`] but the last of at most `n` fields keeps its
/// commas.
fn split_n(s: &str, n: usize) -> Vec<String> {
    s.splitn(n, ',').map(|tok| tok.trim().to_string()).collect()
}

/// Everything after the message kind.
fn rest(line: &str) -> String {
    split_n(line, 2).get(1).cloned().unwrap_or_default()
}

fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

fn algo_ref_field(algo: &AlgoRef) -> String {
    match algo {
        AlgoRef::Id(id) => id.to_string(),
        AlgoRef::Token(token) => token.clone(),
    }
}

fn parse_algo_ref(s: &str) -> Result<AlgoRef, ProtocolError> {
    if s.is_empty() {
        return Err(invalid("algo", s));
    }
    Ok(AlgoRef::parse(s))
}

fn non_empty(field: &'static str, s: &str) -> Result<String, ProtocolError> {
    if s.is_empty() {
        return Err(invalid(field, s));
    }
    Ok(s.to_string())
}

fn parse_src(s: &str) -> Result<DataSrc, ProtocolError> {
    s.parse::<DataSrc>().map_err(|_| invalid("source", s))
}

fn parse_u32(field: &'static str, s: &str) -> Result<u32, ProtocolError> {
    s.parse::<u32>().map_err(|_| invalid(field, s))
}

fn parse_f64(field: &'static str, s: &str) -> Result<f64, ProtocolError> {
    s.parse::<f64>().map_err(|_| invalid(field, s))
}

fn invalid(field: &'static str, value: &str) -> ProtocolError {
    ProtocolError::InvalidField {
        field,
        value: value.to_string(),
    }
}

fn field_count(kind: char, expected: usize, got: usize) -> ProtocolError {
    ProtocolError::FieldCount {
        kind,
        expected,
        got,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use algo_core::RecordKind;

    #[test]
    fn spawn_keeps_commas_in_params() {
        let req = parse_request(r#"S, twap, t-1, {"qty": 100, "limit": 9.5}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            req,
            ClientRequest::Spawn {
                name: "twap".to_string(),
                token: "t-1".to_string(),
                params: r#"{"qty": 100, "limit": 9.5}"#.to_string(),
            }
        );
    }

    #[test]
    fn spawn_without_params_is_accepted() {
        let req = parse_request("S, idle, t").unwrap().unwrap();
        assert!(matches!(req, ClientRequest::Spawn { ref params, .. } if params.is_empty()));
        assert!(matches!(
            parse_request("S, , t"),
            Err(ProtocolError::InvalidField { field: "name", .. })
        ));
    }

    #[test]
    fn stop_variants() {
        assert_eq!(
            parse_request("X").unwrap(),
            Some(ClientRequest::Stop(StopTarget::All))
        );
        assert_eq!(
            parse_request("X, 12").unwrap(),
            Some(ClientRequest::Stop(StopTarget::Algo(AlgoRef::Id(12))))
        );
        assert_eq!(
            parse_request("X, my-token").unwrap(),
            Some(ClientRequest::Stop(StopTarget::Algo(AlgoRef::Token("my-token".into()))))
        );
        assert_eq!(
            parse_request("X, sec, 42").unwrap(),
            Some(ClientRequest::Stop(StopTarget::Security(SecurityId(42))))
        );
        assert!(parse_request("X, sec, abc").is_err());
    }

    #[test]
    fn query_and_history() {
        assert_eq!(parse_request("Q").unwrap(), Some(ClientRequest::Query(None)));
        assert_eq!(
            parse_request("Q, 3").unwrap(),
            Some(ClientRequest::Query(Some(AlgoRef::Id(3))))
        );
        assert_eq!(
            parse_request("L, 17").unwrap(),
            Some(ClientRequest::History { seq0: 17 })
        );
        assert_eq!(
            parse_request("L").unwrap(),
            Some(ClientRequest::History { seq0: 0 })
        );
    }

    #[test]
    fn blank_comment_and_unknown_lines() {
        assert_eq!(parse_request("   ").unwrap(), None);
        assert_eq!(parse_request("# note").unwrap(), None);
        assert!(matches!(
            parse_request("Z, 1"),
            Err(ProtocolError::UnknownMessageType(ref t)) if t == "Z"
        ));
        assert!(matches!(
            parse_request("SPAWN, a, b"),
            Err(ProtocolError::UnknownMessageType(_))
        ));
        assert!(matches!(
            parse_request("M, 1"),
            Err(ProtocolError::FieldCount { kind: 'M', .. })
        ));
    }

    #[test]
    fn formatted_requests_parse_back() {
        let requests = [
            ClientRequest::Modify {
                algo: AlgoRef::Token("abc".into()),
                params: r#"{"a": 1, "b": 2}"#.into(),
            },
            ClientRequest::Stop(StopTarget::Security(SecurityId(5))),
            ClientRequest::Query(Some(AlgoRef::Id(9))),
        ];
        for req in requests {
            let line = format_request(&req);
            assert_eq!(parse_request(&line).unwrap(), Some(req));
        }
    }

    #[test]
    fn feed_injection_lines() {
        assert_eq!(
            parse_request("T, BBGX, 7, 10.5, 200").unwrap(),
            Some(ClientRequest::Trade {
                src: DataSrc::new("BBGX").unwrap(),
                sec: SecurityId(7),
                price: 10.5,
                qty: 200.0,
            })
        );

        let quote = parse_request("B, , 7, 9.5, 100, 10.5, 300").unwrap().unwrap();
        let ClientRequest::Quote { src, quote, .. } = quote else {
            panic!("expected a quote");
        };
        assert!(src.is_default());
        assert_eq!(quote.ask_size, 300.0);

        let fill = parse_request("F, 12, partially_filled, 40, 10.25, venue says, hi")
            .unwrap()
            .unwrap();
        assert_eq!(
            fill,
            ClientRequest::Confirm(
                Confirmation::fill(12, 40.0, 10.25, false).with_text("venue says, hi")
            )
        );
        assert_eq!(
            parse_request(&format_request(&fill)).unwrap(),
            Some(fill)
        );

        assert!(matches!(
            parse_request("F, 12, done, 1, 1"),
            Err(ProtocolError::InvalidField { field: "exec type", .. })
        ));
    }

    #[test]
    fn reply_lines() {
        let row = ServerReply::InstrumentRow {
            id: 3,
            src: DataSrc::new("BBGX").unwrap(),
            sec: SecurityId(7),
            exposure: Exposure {
                bought_qty: 100.0,
                sold_qty: 0.0,
                outstanding_buy_qty: 25.5,
                outstanding_sell_qty: 0.0,
            },
        };
        let line = format_reply(&row);
        assert_eq!(line, "P, 3, BBGX, 7, 100, 0, 25.5, 0");
        assert_eq!(parse_reply(&line).unwrap(), Some(row));

        assert_eq!(
            format_reply(&ServerReply::Error("bad\nthing, really".into())),
            "E, bad thing, really"
        );
        assert_eq!(
            parse_reply("E, bad thing, really").unwrap(),
            Some(ServerReply::Error("bad thing, really".into()))
        );
        assert_eq!(format_reply(&ServerReply::End(4)), "Z, 4");
    }

    #[test]
    fn record_reply_carries_the_whole_record() {
        let record = Record {
            seq: 5,
            tm: 1_700_000_000_000,
            algo_id: 2,
            token: "t, with comma".to_string(),
            kind: RecordKind::Stop,
            status: "start failed: x, y".to_string(),
            body: String::new(),
        };
        let line = format_reply(&ServerReply::Record(record.clone()));
        assert!(line.starts_with("R, {"));
        assert_eq!(parse_reply(&line).unwrap(), Some(ServerReply::Record(record)));
    }
}
