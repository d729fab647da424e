//! Peer-side probe: sends one request to a running coordinator and prints the response.
//!
//! ```text
//! ev_probe get battery.voltage
//! ev_probe set speed 40
//! ev_probe action setFanPower 60
//! ev_probe --addr 127.0.0.1:4000 action nearestObstacle
//! ```
//! Values are typed the same way fixture cells are: int, then float, then bool, else string.

use std::{
    env,
    io::{BufRead, BufReader, Write},
    net::{SocketAddr, TcpStream},
    process,
    time::Duration,
};

use log::{debug, error};

use ev_systems::{Request, Response, Value, config::DEFAULT_LISTEN_ADDR};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

fn usage() -> ! {
    eprintln!("usage: ev_probe [--addr HOST:PORT] get NAME | set NAME VALUE | action NAME [ARGS...]");
    process::exit(2);
}

fn parse_args(mut args: Vec<String>) -> (SocketAddr, Request) {
    let mut addr = DEFAULT_LISTEN_ADDR.to_string();
    if args.first().map(String::as_str) == Some("--addr") {
        if args.len() < 2 {
            usage();
        }
        addr = args.remove(1);
        args.remove(0);
    }
    let addr: SocketAddr = match addr.parse() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("bad address '{}': {}", addr, e);
            process::exit(2);
        }
    };

    let request = match args.as_slice() {
        [kind, name] if kind == "get" => Request::get(name),
        [kind, name, value] if kind == "set" => Request::set(name, Value::infer(value)),
        [kind, name, rest @ ..] if kind == "action" => {
            Request::action(name, rest.iter().map(|a| Value::infer(a)).collect())
        }
        _ => usage(),
    };
    (addr, request.with_key(1u64))
}

fn main() {
    env_logger::init();
    let (addr, request) = parse_args(env::args().skip(1).collect());

    match call(addr, &request) {
        Ok(response) => {
            let ok = response.ok;
            match serde_json::to_string_pretty(&response) {
                Ok(text) => println!("{}", text),
                Err(e) => error!("cannot render response: {}", e),
            }
            if !ok {
                process::exit(1);
            }
        }
        Err(e) => {
            error!("request to {} failed: {}", addr, e);
            process::exit(1);
        }
    }
}

fn call(addr: SocketAddr, request: &Request) -> Result<Response, Box<dyn std::error::Error>> {
    let mut stream = TcpStream::connect_timeout(&addr, READ_TIMEOUT)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    let mut line = serde_json::to_vec(request)?;
    line.push(b'\n');
    stream.write_all(&line)?;
    debug!("sent {}", String::from_utf8_lossy(&line).trim_end());

    let mut reader = BufReader::new(stream);
    let mut reply = String::new();
    if reader.read_line(&mut reply)? == 0 {
        return Err("connection closed before a response arrived".into());
    }
    Ok(serde_json::from_str(reply.trim_end())?)
}
