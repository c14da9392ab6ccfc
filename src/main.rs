use lib::storage_layer::page_range::Rid;
use lib::table_layer::{error::TableError, table::Table};

use std::io::{self, Stdin};

const USAGE: &str = "commands:
  insert <v0> <v1> ...       insert a record, the key column is taken from the values
  update <rid> <v0|_> ...    update a record, _ keeps the current value
  delete <rid>
  select <rid>
  rids                       list live base rids
  merge                      run one merge round
  flush
  quit";

pub struct Executor {
    pub table: Table,
}

#[derive(Debug)]
enum Command {
    Insert(Vec<i64>),
    Update(Rid, Vec<Option<i64>>),
    Delete(Rid),
    Select(Rid),
    Rids,
    Merge,
    Flush,
    Quit,
}

fn parse_rid(token: Option<&str>) -> Result<Rid, String> {
    token
        .ok_or_else(|| "missing rid".to_owned())?
        .parse::<Rid>()
        .map_err(|e| format!("invalid rid: {}", e))
}

fn parse_value(token: &str) -> Result<i64, String> {
    token
        .parse::<i64>()
        .map_err(|e| format!("invalid value {:?}: {}", token, e))
}

fn parse_command(line: &str) -> Result<Command, String> {
    let mut tokens = line.split_whitespace();
    let verb = tokens.next().ok_or_else(|| "empty command".to_owned())?;

    match verb {
        "insert" => Ok(Command::Insert(
            tokens.map(parse_value).collect::<Result<_, _>>()?,
        )),
        "update" => {
            let rid = parse_rid(tokens.next())?;
            let values = tokens
                .map(|token| match token {
                    "_" => Ok(None),
                    value => parse_value(value).map(Some),
                })
                .collect::<Result<_, _>>()?;
            Ok(Command::Update(rid, values))
        }
        "delete" => Ok(Command::Delete(parse_rid(tokens.next())?)),
        "select" => Ok(Command::Select(parse_rid(tokens.next())?)),
        "rids" => Ok(Command::Rids),
        "merge" => Ok(Command::Merge),
        "flush" => Ok(Command::Flush),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(format!("unknown command {:?}\n{}", other, USAGE)),
    }
}

impl Executor {
    pub fn new(table: Table) -> Self {
        Self { table }
    }

    fn read_command(stdin: &Stdin) -> Option<String> {
        let mut line = String::new();
        match stdin.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line),
            Err(e) => {
                println!("Error: Failed to read from stdin: {}", e);
                None
            }
        }
    }

    fn execute(&mut self, command: Command) -> Result<bool, TableError> {
        match command {
            Command::Insert(values) => {
                let key = values.get(self.table.key_column()).copied().unwrap_or_default();
                let rid = self.table.insert(key, &values)?;
                println!("inserted rid {}", rid);
            }
            Command::Update(rid, values) => {
                let tail = self.table.update(rid, &values)?;
                println!("updated rid {} with tail {}", rid, tail);
            }
            Command::Delete(rid) => {
                self.table.delete(rid)?;
                println!("deleted rid {}", rid);
            }
            Command::Select(rid) => {
                let record = self.table.read_record(rid)?;
                println!("{:?}", record);
            }
            Command::Rids => println!("{:?}", self.table.base_rids()?),
            Command::Merge => println!("{:?}", self.table.merge()?),
            Command::Flush => println!("flushed {} page ranges", self.table.flush()?),
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }

    pub fn run(&mut self) {
        let stdin: Stdin = io::stdin();

        while let Some(line) = Self::read_command(&stdin) {
            if line.trim().is_empty() {
                continue;
            }

            let command = match parse_command(&line) {
                Ok(command) => command,
                Err(e) => {
                    println!("Error: {}", e);
                    continue;
                }
            };

            match self.execute(command) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => println!("Error: {}", e),
            }
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let path = args.next().unwrap_or_else(|| "colstore_storage".to_owned());
    let num_columns = args.next().and_then(|n| n.parse().ok()).unwrap_or(5usize);
    let key_column = args.next().and_then(|k| k.parse().ok()).unwrap_or(0usize);

    let table = match Table::new(&path, "main", num_columns, key_column) {
        Ok(table) => table,
        Err(e) => {
            eprintln!("Failed to open table at {}: {}", path, e);
            std::process::exit(1);
        }
    };

    println!("{}", USAGE);
    let mut executor = Executor::new(table);
    executor.run();

    if let Err(e) = executor.table.close() {
        eprintln!("Failed to close table: {}", e);
    }
}
