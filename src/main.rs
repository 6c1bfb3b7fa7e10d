#[macro_use]
extern crate log;

use simplelog::{ColorChoice, CombinedLogger, LevelFilter, TermLogger, TerminalMode};
use std::collections::HashMap;
use std::io;
use std::str::FromStr;

use vanish_dht::{Config, Key, Node, Vdo};

const NETWORK_SIZE: usize = 20;

fn parse<T: FromStr>(arg: Option<&&str>) -> Option<T> {
    arg.and_then(|arg| arg.parse().ok())
}

fn spawn(bootstrap: Option<&Node>) -> Option<Node> {
    match Node::new(Config::default(), bootstrap.map(Node::contact)) {
        Ok(node) => Some(node),
        Err(err) => {
            error!("Could not start node: {}", err);
            None
        },
    }
}

fn main() {
    if let Err(err) = CombinedLogger::init(vec![TermLogger::new(
        LevelFilter::Info,
        simplelog::Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )]) {
        eprintln!("Could not install logger: {}", err);
    }

    let mut nodes: Vec<Node> = Vec::new();
    for _ in 0..NETWORK_SIZE {
        if let Some(node) = spawn(nodes.first()) {
            nodes.push(node);
        }
    }

    let mut vdos: HashMap<i64, Vdo> = HashMap::new();
    let input = io::stdin();

    loop {
        let mut buffer = String::new();
        println!("Ready for input!");
        match input.read_line(&mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(_) => {},
        }
        let args: Vec<&str> = buffer.trim_end().split(' ').collect();
        let node = match parse::<usize>(args.get(1)).and_then(|index| nodes.get(index)) {
            Some(node) => node.clone(),
            None => {
                warn!("Expected `<command> <node index> ...`, got {:?}", buffer.trim_end());
                continue;
            },
        };

        match args[0] {
            "new" => {
                if let Some(new_node) = spawn(Some(&node)) {
                    info!("Started node {} at {}", nodes.len(), new_node.addr());
                    nodes.push(new_node);
                }
            },
            "insert" => match (args.get(2), args.get(3)) {
                (Some(key), Some(value)) => {
                    match node.store(Key::hash(key.as_bytes()), value.as_bytes()) {
                        Ok(contacts) => info!("Stored on {} nodes", contacts.len()),
                        Err(err) => error!("{}", err),
                    }
                },
                _ => warn!("Usage: insert <node index> <key> <value>"),
            },
            "get" => match args.get(2) {
                Some(key) => match node.find_value(&Key::hash(key.as_bytes())) {
                    Ok((value, contact)) => {
                        info!("{:?} from {}", String::from_utf8_lossy(&value), contact)
                    },
                    Err(err) => error!("{}", err),
                },
                None => warn!("Usage: get <node index> <key>"),
            },
            "vanish" => match (parse::<u8>(args.get(2)), args.get(3)) {
                (Some(number_keys), Some(payload)) => {
                    let ratio = node.config().threshold_ratio;
                    match node.vanish(payload.as_bytes(), number_keys, ratio) {
                        Ok((access_key, vdo)) => {
                            info!(
                                "Access key {}, {} of {} shares needed",
                                access_key, vdo.threshold, vdo.number_keys
                            );
                            vdos.insert(access_key, vdo);
                        },
                        Err(err) => error!("{}", err),
                    }
                },
                _ => warn!("Usage: vanish <node index> <number of keys> <payload>"),
            },
            "unvanish" => match parse::<i64>(args.get(2)) {
                Some(access_key) => match vdos.get(&access_key) {
                    Some(vdo) => match node.unvanish(vdo, access_key) {
                        Ok(payload) => info!("{:?}", String::from_utf8_lossy(&payload)),
                        Err(err) => error!("{}", err),
                    },
                    None => warn!("No vanished data under access key {}", access_key),
                },
                None => warn!("Usage: unvanish <node index> <access key>"),
            },
            "kill" => {
                node.kill();
                info!("Killed {}", node.addr());
            },
            command => warn!("Unknown command {:?}", command),
        }
    }
}
