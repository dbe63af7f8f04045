use anyhow::{Context, Result, bail};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::{
    backend::{HttpBackend, StampBackend},
    card::{CardId, LoyaltyCard},
    config::Config,
    flow::{CustomerSession, MerchantSession, StampReceipt},
    history::Confirmation,
    session::SystemClock,
};

fn backend(config: &Config) -> Result<Arc<HttpBackend>> {
    HttpBackend::new(&config.api_base_url, config.request_timeout()).map(Arc::new)
}

fn print_card(card: &LoyaltyCard) {
    println!(
        "#{} {} @ {}: {}/{} stamps ({:.0}%) [{}]{}",
        card.card_id,
        card.program_name,
        card.merchant_name,
        card.stamps_count,
        card.stamps_needed,
        card.progress_percent(),
        card.status.as_str(),
        if card.has_reward {
            format!(" reward ready: {}", card.reward_name)
        } else {
            String::new()
        }
    );
}

/// `cards`: list every card of a customer
pub async fn cards(config: &Config, customer_id: i64) -> Result<()> {
    let cards = backend(config)?.customer_cards(customer_id).await?;
    if cards.is_empty() {
        println!("No loyalty cards for customer {}", customer_id);
    }
    for card in &cards {
        print_card(card);
    }
    Ok(())
}

/// `show-qr`: display a fresh code and count down until it expires or the
/// user interrupts
pub async fn show_qr(config: &Config, customer_id: i64) -> Result<()> {
    let mut session = CustomerSession::new(backend(config)?, Arc::new(SystemClock), customer_id);
    print_card(session.load_card().await?);

    let shown = session.show_token().await?;
    println!("{}", shown.transport);

    let mut state = shown.state;
    loop {
        let current = *state.borrow_and_update();
        if current.expired {
            println!("Code expired");
            break;
        }
        println!("Valid for {} more minute(s)", current.remaining_minutes);

        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Code discarded");
                break;
            }
        }
    }

    session.close_token();
    Ok(())
}

/// `redeem`: hand out the reward of a full card
pub async fn redeem(config: &Config, card_id: i64) -> Result<()> {
    let card = backend(config)?.redeem_card(CardId(card_id)).await?;
    print_card(&card);
    Ok(())
}

fn print_receipt(receipt: &StampReceipt) {
    let result = &receipt.result;
    println!(
        "Stamp applied to card #{}: {}/{}",
        result.card_id, result.stamps_count, result.stamps_needed
    );
    if result.reward_issued {
        println!("Reward earned!");
    }
}

async fn next_line(lines: &mut Lines<BufReader<Stdin>>) -> Result<Option<String>> {
    Ok(lines.next_line().await?.map(|l| l.trim().to_string()))
}

/// `scan`: merchant console. Each input line is handled as one recognized
/// code; lines starting with `:` are operator commands.
pub async fn scan(config: &Config) -> Result<()> {
    let backend = backend(config)?;
    let mut merchant = MerchantSession::new(
        backend.clone(),
        Arc::new(SystemClock),
        config.request_timeout(),
    );
    merchant.start_scanning();
    println!("Scanning. Commands: :scan :stop :retry :history :clear :track <customer> :redeem <card> :quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = next_line(&mut lines).await? {
        let mut words = line.split_whitespace();
        match words.next() {
            None => continue,
            Some(":quit") => break,
            Some(":scan") => {
                merchant.start_scanning();
                println!("Scanning");
            }
            Some(":stop") => {
                merchant.stop_scanning();
                println!("Scanning paused");
            }
            Some(":retry") => match merchant.retry_last().await {
                None => println!("Nothing to retry"),
                Some(Ok(receipt)) => print_receipt(&receipt),
                Some(Err(e)) => println!("Stamp failed: {}", e),
            },
            Some(":history") => {
                for entry in merchant.history().entries() {
                    println!(
                        "{} card #{} {}/{}{}",
                        entry.applied_at.format("%Y-%m-%d %H:%M:%S"),
                        entry.card_id,
                        entry.stamps_count,
                        entry.stamps_needed,
                        if entry.reward_earned { " reward" } else { "" }
                    );
                }
            }
            Some(":clear") => {
                println!("Clear the whole history? [y/N]");
                let answer = next_line(&mut lines).await?.unwrap_or_default();
                let confirmation = if answer.eq_ignore_ascii_case("y") {
                    Confirmation::Confirmed
                } else {
                    Confirmation::Cancelled
                };
                println!("Removed {} entries", merchant.clear_history(confirmation));
            }
            Some(":track") => match parse_arg(words.next()) {
                Ok(customer_id) => match backend.customer_cards(customer_id).await {
                    Ok(cards) => {
                        for card in cards {
                            print_card(&card);
                            merchant.track_card(card);
                        }
                    }
                    Err(e) => println!("Could not load cards: {}", e),
                },
                Err(e) => println!("{}", e),
            },
            Some(":redeem") => match parse_arg(words.next()) {
                Ok(card_id) => match merchant.redeem(CardId(card_id)).await {
                    Ok(card) => print_card(&card),
                    Err(e) => println!("Redeem failed: {}", e),
                },
                Err(e) => println!("{}", e),
            },
            Some(cmd) if cmd.starts_with(':') => println!("Unknown command {}", cmd),
            Some(_) => match merchant.on_code_recognized(&line).await {
                None => tracing::debug!("Scanner not armed, code ignored"),
                Some(Ok(receipt)) => {
                    print_receipt(&receipt);
                    if let Some(card) = merchant.card(receipt.result.card_id) {
                        print_card(card);
                    }
                }
                Some(Err(e)) => {
                    println!("Stamp failed: {}", e);
                    if e.is_retryable() {
                        println!("Type :retry to submit the same code again");
                    } else if merchant.can_retry() {
                        println!("An earlier code is still waiting for :retry");
                    }
                }
            },
        }
    }

    Ok(())
}

fn parse_arg(arg: Option<&str>) -> Result<i64> {
    match arg {
        Some(s) => s.parse().with_context(|| format!("Invalid id {:?}", s)),
        None => bail!("Missing id"),
    }
}
