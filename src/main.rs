use clap::Parser;
use colored::Colorize;
use rustyline::DefaultEditor;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use regsort::arch::{Arch, Context};
use regsort::emit::{setregs, AsmText};
use regsort::types::{Assignment, Operation, Value};

#[derive(Parser)]
#[command(name = "regsort", about = "Sequence register assignments into mov/xchg steps")]
struct Cli {
    /// Target architecture (amd64, i386)
    #[arg(short, long, default_value = "amd64")]
    arch: Arch,

    /// Pick randomly among equally valid move orders
    #[arg(short, long)]
    random: bool,

    /// Do not merge destinations that want the same constant
    #[arg(long)]
    no_collapse: bool,

    /// Log sequencing decisions to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Assignments as dst=src (e.g. rdi=rsi rsi=rdi rax=59); starts a REPL when empty
    assignments: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut ctx = Context::new(cli.arch)
        .with_randomize(cli.random)
        .with_collapse(!cli.no_collapse);

    if !cli.assignments.is_empty() {
        let args: Vec<&str> = cli.assignments.iter().map(|s| s.as_str()).collect();
        let asn = parse_assignments(&args)?;
        return cmd_set(&ctx, &asn);
    }

    repl(&mut ctx)
}

fn init_logging(verbose: bool) {
    let default = if verbose { "regsort=debug" } else { "regsort=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

fn repl(ctx: &mut Context) -> anyhow::Result<()> {
    println!(
        "{} register sequencer ({}), type {} for commands",
        "regsort".bold().cyan(),
        ctx.arch,
        "help".bold()
    );

    let mut rl = DefaultEditor::new()?;

    loop {
        let prompt = format!("{} ", "regsort>".bold().green());
        let line = match rl.readline(&prompt) {
            Ok(line) => line,
            Err(
                rustyline::error::ReadlineError::Interrupted
                | rustyline::error::ReadlineError::Eof,
            ) => {
                break;
            }
            Err(e) => {
                eprintln!("readline error: {}", e);
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        rl.add_history_entry(line)?;

        let parts: Vec<&str> = line.split_whitespace().collect();
        let cmd = parts[0];
        let args = &parts[1..];

        if matches!(cmd, "quit" | "exit" | "q") {
            break;
        }
        if let Err(e) = handle_command(ctx, cmd, args) {
            eprintln!("{}: {}", "error".red(), e);
        }
    }

    Ok(())
}

fn handle_command(ctx: &mut Context, cmd: &str, args: &[&str]) -> anyhow::Result<()> {
    match cmd {
        "set" | "s" => {
            if args.is_empty() {
                println!("usage: set <dst=src>...");
                return Ok(());
            }
            let asn = parse_assignments(args)?;
            cmd_set(ctx, &asn)
        }
        "arch" => {
            match args.first() {
                Some(name) => {
                    ctx.arch = name.parse()?;
                    println!("  arch = {}", ctx.arch.to_string().cyan());
                }
                None => println!("  arch = {} ({}-bit)", ctx.arch.to_string().cyan(), ctx.arch.bits()),
            }
            Ok(())
        }
        "random" => {
            ctx.randomize = parse_toggle(args, ctx.randomize)?;
            println!("  random = {}", ctx.randomize);
            Ok(())
        }
        "collapse" => {
            ctx.collapse = parse_toggle(args, ctx.collapse)?;
            println!("  collapse = {}", ctx.collapse);
            Ok(())
        }
        "regs" => {
            println!("  {}", ctx.arch.registers().join(" "));
            println!(
                "  syscall: {}",
                ctx.arch.syscall_registers().join(" ").dimmed()
            );
            Ok(())
        }
        "help" | "h" => cmd_help(),
        _ => {
            println!(
                "unknown command: {}. Type {} for a list of commands.",
                cmd,
                "help".bold()
            );
            Ok(())
        }
    }
}

fn cmd_set(ctx: &Context, asn: &Assignment) -> anyhow::Result<()> {
    let mut asm = AsmText::new();
    let ops = setregs(ctx, asn, &mut asm)?;
    if ops.is_empty() {
        println!("  {}", "nothing to do".yellow());
        return Ok(());
    }
    for (i, op) in ops.iter().enumerate() {
        let mnemonic = match op {
            Operation::Move { .. } => "mov".green(),
            Operation::Swap(..) => "xchg".yellow(),
        };
        let text = op.to_string();
        let operands = text.split_once(' ').map(|(_, rest)| rest).unwrap_or("");
        println!("  {:>3}  {} {}", i.to_string().dimmed(), mnemonic, operands);
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!("{}", "regsort - register assignment sequencer".bold());
    println!();
    println!("  {} (s) <dst=src>...   sequence an assignment", "set".bold());
    println!("    set rdi=rsi rsi=rdi rax=59");
    println!("    set eax=SYS_execve ebx=esp ecx=0");
    println!("  {} [name]            show or select the target (amd64, i386)", "arch".bold());
    println!("  {} [on|off]        randomize among equally valid orders", "random".bold());
    println!("  {} [on|off]      merge destinations sharing a constant", "collapse".bold());
    println!("  {}                   list registers of the target", "regs".bold());
    println!("  {} (h)               show this help", "help".bold());
    println!("  {} (q)               leave", "quit".bold());
    Ok(())
}

fn parse_toggle(args: &[&str], current: bool) -> anyhow::Result<bool> {
    match args.first().copied() {
        None => Ok(!current),
        Some("on") | Some("true") | Some("1") => Ok(true),
        Some("off") | Some("false") | Some("0") => Ok(false),
        Some(other) => Err(anyhow::anyhow!("expected on or off, got '{}'", other)),
    }
}

/// Parse `dst=src` words into an assignment, keeping their order.
fn parse_assignments(args: &[&str]) -> anyhow::Result<Assignment> {
    let mut asn = Assignment::new();
    for arg in args {
        let (dst, src) = arg
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected dst=src, got '{}'", arg))?;
        let dst = dst.trim();
        if dst.is_empty() {
            return Err(anyhow::anyhow!("missing destination in '{}'", arg));
        }
        asn.insert(dst, parse_value(src.trim())?);
    }
    Ok(asn)
}

/// Parse a source: decimal or `0x` hex integer (optionally negative), else a name.
fn parse_value(s: &str) -> anyhow::Result<Value> {
    if s.is_empty() {
        return Err(anyhow::anyhow!("missing source value"));
    }
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    if !digits.starts_with(|c: char| c.is_ascii_digit()) {
        if negative {
            return Err(anyhow::anyhow!("invalid value '{}'", s));
        }
        return Ok(Value::from(s));
    }

    let magnitude = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => digits.parse::<u64>(),
    }
    .map_err(|e| anyhow::anyhow!("invalid integer '{}': {}", s, e))?;

    let value = if negative {
        0i64.checked_sub_unsigned(magnitude)
    } else {
        i64::try_from(magnitude).ok()
    }
    .ok_or_else(|| anyhow::anyhow!("integer '{}' does not fit in 64 bits", s))?;
    Ok(Value::Int(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_integers() {
        assert_eq!(parse_value("59").unwrap(), Value::Int(59));
        assert_eq!(parse_value("0x3b").unwrap(), Value::Int(59));
        assert_eq!(parse_value("-1").unwrap(), Value::Int(-1));
        assert_eq!(parse_value("-0x8000000000000000").unwrap(), Value::Int(i64::MIN));
        assert!(parse_value("0x8000000000000000").is_err());
        assert!(parse_value("12abc").is_err());
        assert!(parse_value("").is_err());
    }

    #[test]
    fn parse_names() {
        assert_eq!(parse_value("rsi").unwrap(), Value::from("rsi"));
        assert_eq!(parse_value("SYS_execve").unwrap(), Value::from("SYS_execve"));
        assert!(parse_value("-rsi").is_err());
    }

    #[test]
    fn parse_assignment_words() {
        let asn = parse_assignments(&["rdi=rsi", "rax=59", "rdi=rdx"]).unwrap();
        let order: Vec<&str> = asn.destinations().collect();
        assert_eq!(order, vec!["rdi", "rax"]);
        assert_eq!(asn.get("rdi"), Some(&Value::from("rdx")));
        assert!(parse_assignments(&["rdi"]).is_err());
        assert!(parse_assignments(&["=1"]).is_err());
    }

    #[test]
    fn toggle() {
        assert!(parse_toggle(&["on"], false).unwrap());
        assert!(!parse_toggle(&["off"], true).unwrap());
        assert!(parse_toggle(&[], false).unwrap());
        assert!(parse_toggle(&["maybe"], false).is_err());
    }

    #[test]
    fn repl_commands_update_context() {
        let mut ctx = Context::default();
        handle_command(&mut ctx, "arch", &["i386"]).unwrap();
        assert_eq!(ctx.arch, Arch::I386);
        handle_command(&mut ctx, "random", &["on"]).unwrap();
        assert!(ctx.randomize);
        assert!(handle_command(&mut ctx, "arch", &["mips"]).is_err());
        assert!(handle_command(&mut ctx, "set", &["rax=1"]).is_err());
        assert!(handle_command(&mut ctx, "set", &["eax=1", "ebx=eax"]).is_ok());
    }
}
