use chrono::NaiveDate;

// Default message bodies, one per reminder type. Used whenever neither the
// reminder row nor the user's settings carry an override.
pub const DEFAULT_TEMPLATE_BEFORE: &str = "Hola {contact_name}, te recordamos que tienes un pago pendiente de {currency} {amount} con vencimiento el {due_date}.";
pub const DEFAULT_TEMPLATE_ON_DUE: &str = "Hola {contact_name}, hoy vence tu pago de {currency} {amount}. ¡Gracias por tu puntualidad!";
pub const DEFAULT_TEMPLATE_AFTER: &str = "Hola {contact_name}, tu pago de {currency} {amount} venció hace {days_overdue} día(s). Por favor regularízalo a la brevedad.";
pub const DEFAULT_TEMPLATE_GENERIC: &str = "Hola {contact_name}, tienes un pago pendiente de {currency} {amount}.";

pub fn default_template(reminder_type: &str) -> &'static str {
    match reminder_type {
        "before_due" => DEFAULT_TEMPLATE_BEFORE,
        "on_due" => DEFAULT_TEMPLATE_ON_DUE,
        "after_due" => DEFAULT_TEMPLATE_AFTER,
        _ => DEFAULT_TEMPLATE_GENERIC,
    }
}

/// Values available to a template. `due_date` is the stored `YYYY-MM-DD` form;
/// it renders as `DD/MM/YYYY`.
pub struct ReminderContext<'a> {
    pub contact_name: &'a str,
    pub amount: Option<f64>,
    pub currency: Option<&'a str>,
    pub due_date: Option<&'a str>,
    pub days_overdue: Option<i64>,
}

/// Literal placeholder substitution. A placeholder with no value behind it is
/// left in the output untouched, which also makes re-rendering a no-op.
pub fn render_template(template: &str, ctx: &ReminderContext) -> String {
    let mut out = template.replace("{contact_name}", ctx.contact_name);

    if let Some(amount) = ctx.amount {
        out = out.replace("{amount}", &format!("{:.2}", amount));
    }
    if let Some(currency) = ctx.currency {
        out = out.replace("{currency}", currency);
    }
    if let Some(due_date) = ctx.due_date {
        if let Ok(date) = NaiveDate::parse_from_str(due_date, "%Y-%m-%d") {
            out = out.replace("{due_date}", &date.format("%d/%m/%Y").to_string());
        }
    }
    if let Some(days) = ctx.days_overdue {
        out = out.replace("{days_overdue}", &days.abs().to_string());
    }

    out
}
