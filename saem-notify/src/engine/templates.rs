//! Outbound message text
//!
//! Messages are in Portuguese, the language of the ensemble. `*...*` is the
//! chat app's bold markup.

use saem_common::{ItemKind, Musician, RepertoireItem, ScheduleDetails};
use std::fmt::Write;

const TEST_MESSAGE: &str = "Esta é uma mensagem de teste do Sistema SAEM. Se você recebeu esta \
                            mensagem, a configuração do WhatsApp está funcionando corretamente.";

#[derive(Debug, Clone, Copy, Default)]
pub struct MessageTemplater;

impl MessageTemplater {
    /// Reminder sent by the daily digest for an item happening today
    pub fn reminder_for_today(
        &self,
        musician: &Musician,
        kind: ItemKind,
        item: &ScheduleDetails,
    ) -> String {
        let mut text = format!(
            "Olá {}, lembrete: Você tem um {} hoje!\n\n*{}*\nHorário: {}\nLocal: {}\n",
            musician.name,
            kind.noun(),
            item.title,
            item.time_window(),
            item.location
        );
        push_description(&mut text, item);
        push_repertoire(&mut text, &item.repertoire);
        text.truncate(text.trim_end().len());
        text
    }

    /// Notice sent on demand when a coordinator publishes an item
    pub fn assignment_notice(
        &self,
        musician: &Musician,
        kind: ItemKind,
        item: &ScheduleDetails,
    ) -> String {
        let mut text = format!(
            "Olá {}, você foi escalado para um {}!\n\n*{}*\nData: {}\nHorário: {}\nLocal: {}\n",
            musician.name,
            kind.noun(),
            item.title,
            item.display_date(),
            item.time_window(),
            item.location
        );
        push_description(&mut text, item);
        push_repertoire(&mut text, &item.repertoire);
        text.truncate(text.trim_end().len());
        text.push_str("\n\nPor favor, confirme sua presença respondendo SIM ou NÃO.");
        text
    }

    /// Sent to musicians available today with nothing scheduled
    pub fn availability_reminder(&self, musician: &Musician) -> String {
        format!(
            "Olá {}, hoje é seu dia de disponibilidade para ensaios. Não há ensaios ou eventos \
             agendados para você hoje, mas fique atento a possíveis mudanças.",
            musician.name
        )
    }

    pub fn test_message(&self) -> String {
        TEST_MESSAGE.to_string()
    }
}

fn push_description(text: &mut String, item: &ScheduleDetails) {
    if let Some(description) = item.description.as_deref().filter(|d| !d.trim().is_empty()) {
        let _ = writeln!(text, "Descrição: {}", description);
    }
}

fn push_repertoire(text: &mut String, repertoire: &[RepertoireItem]) {
    if repertoire.is_empty() {
        return;
    }
    text.push_str("\nRepertório:");
    for piece in repertoire {
        let composer = piece.composer.as_deref().filter(|c| !c.trim().is_empty()).unwrap_or("N/A");
        let _ = write!(text, "\n- {} ({})", piece.title, composer);
    }
}
