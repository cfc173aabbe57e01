//! HTML message rendering for events.

use smartflow_core::{short_address, Event, FetchedItem, TargetClass, TargetKey};
use smartflow_feeds::escape_html;
use smartflow_feeds::pumpfun::coin_link;

/// Format a USD amount with precision based on magnitude.
pub fn format_usd(value: f64) -> String {
    if value == 0.0 {
        return "$0".to_string();
    }
    let abs = value.abs();
    if abs >= 1000.0 {
        format!("${:.0}", value)
    } else if abs >= 1.0 {
        format!("${:.2}", value)
    } else if abs >= 0.01 {
        format!("${:.4}", value)
    } else if abs >= 0.0001 {
        format!("${:.8}", value)
    } else {
        format!("${:.10}", value)
    }
}

/// Render an event as a Telegram HTML message.
pub fn format_event(event: &Event) -> String {
    match event {
        Event::NewItem { target, item } => match target.class {
            TargetClass::Listings => format_listing(item),
            TargetClass::Wallet => format_wallet_activity(target, item),
            TargetClass::Token => format_generic_item(target, item),
        },
        Event::Jump {
            target,
            change_pct,
            window_secs,
            first,
            last,
            symbol,
        } => {
            let token = match symbol {
                Some(symbol) => format!("<b>{}</b> ", escape_html(symbol)),
                None => String::new(),
            };
            format!(
                "📈 <b>Big move detected</b>\n\
                 • Token: {}<code>{}</code>\n\
                 • Change (last {}m): <b>{:+.1}%</b>\n\
                 • Price: {} → {}\n\
                 • <a href=\"{}\">View on Pump.fun</a>",
                token,
                escape_html(&short_address(&target.id)),
                window_secs / 60,
                change_pct,
                format_usd(first.value),
                format_usd(last.value),
                escape_html(&coin_link(&target.id))
            )
        }
    }
}

fn format_listing(item: &FetchedItem) -> String {
    let name = item.label.as_deref().unwrap_or(&item.id);
    let symbol = item
        .symbol
        .as_deref()
        .map(|s| format!(" ({})", escape_html(s)))
        .unwrap_or_default();
    let mut msg = format!("🆕 <b>New Pump.fun token</b>\n• <b>{}</b>{}\n", escape_html(name), symbol);
    if let Some(mcap) = item.value {
        msg.push_str(&format!("• Market cap: <b>{}</b>\n", format_usd(mcap)));
    }
    msg.push_str(&format!("• Mint: <code>{}</code>\n", escape_html(&item.id)));
    let link = item.link.clone().unwrap_or_else(|| coin_link(&item.id));
    msg.push_str(&format!("• <a href=\"{}\">Open on Pump.fun</a>", escape_html(&link)));
    msg
}

fn format_wallet_activity(target: &TargetKey, item: &FetchedItem) -> String {
    let mut msg = format!(
        "👛 <b>Wallet activity</b>\n• Wallet: <code>{}</code>\n",
        escape_html(&short_address(&target.id))
    );
    if let Some(label) = &item.label {
        msg.push_str(&format!("• {}\n", escape_html(label)));
    }
    if let Some(value) = item.value {
        msg.push_str(&format!("• Value: <b>{}</b>\n", format_usd(value)));
    }
    msg.push_str(&format!(
        "• Time: {}",
        item.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let Some(link) = &item.link {
        msg.push_str(&format!("\n• <a href=\"{}\">View transaction</a>", escape_html(link)));
    }
    msg
}

fn format_generic_item(target: &TargetKey, item: &FetchedItem) -> String {
    let label = item.label.as_deref().unwrap_or(&item.id);
    format!(
        "🔔 <b>{}</b>\n• {}",
        escape_html(&short_address(&target.id)),
        escape_html(label)
    )
}
