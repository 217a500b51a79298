//! Prompt text for each provider operation.
//!
//! Prompts are in Brazilian Portuguese, matching the language of the
//! generated content.

use std::fmt::Write;

use medsim_session::{
    ActionType, ClinicalCase, Difficulty, ScenarioId, Skill, SkillChallenge, UserAction,
};

/// Placeholder for a closing entry the player never wrote.
pub const NOT_PROVIDED: &str = "Não informado";

/// Prompt for a new case.
#[must_use]
pub fn case_prompt(scenario: ScenarioId, difficulty: Difficulty) -> String {
    format!(
        "Você é um simulador de casos clínicos para o ensino de medicina no Brasil.\n\
         Crie um caso clínico realista que aconteça em: \"{scenario}\" ({description}).\n\
         Nível de dificuldade: \"{difficulty}\".\n\
         Escolha uma condição com relevância epidemiológica no Brasil.\n\
         Informe os dados do paciente, a queixa inicial e os sinais vitais, além de uma \
         descrição completa e oculta do caso, com o diagnóstico final, que será usada \
         apenas na avaliação.\n\
         Responda seguindo o schema JSON.",
        scenario = scenario.label(),
        description = scenario.description(),
        difficulty = difficulty.label(),
    )
}

/// Prompt for the reply to an inquiry action.
#[must_use]
pub fn interaction_prompt(case: &ClinicalCase, history: &[UserAction], action: &str) -> String {
    let mut transcript = String::new();
    for entry in history {
        let _ = writeln!(transcript, "- Usuário: {}", entry.prompt_line());
        let _ = writeln!(
            transcript,
            "- Resposta: {}",
            entry.response.as_deref().unwrap_or("")
        );
    }
    if transcript.is_empty() {
        transcript.push_str("(nenhuma ação ainda)\n");
    }

    format!(
        "Simulador médico: um atendimento está em andamento.\n\n\
         Caso completo (com o diagnóstico real): {hidden}\n\n\
         Atendimento até aqui:\n{transcript}\n\
         Nova ação do médico: \"{action}\"\n\n\
         Responda a essa ação de forma realista.\n\
         - Pergunta de anamnese: responda como o paciente.\n\
         - Exame físico: descreva os achados.\n\
         - Exame complementar: informe o resultado, ou diga que o exame não está \
         disponível neste cenário.\n\
         - Seja breve e direto.\n\
         Responda seguindo o schema JSON.",
        hidden = case.full_case_description,
    )
}

/// Prompt for the evaluation of a finished case.
///
/// The transcript lists inquiry entries only; the hypotheses and the final
/// conduct are shown in their own sections.
#[must_use]
pub fn feedback_prompt(case: &ClinicalCase, transcript: &[UserAction]) -> String {
    let mut inquiries = String::new();
    for entry in transcript.iter().filter(|a| !a.kind.is_closing()) {
        let _ = writeln!(inquiries, "- {}: {}", entry.kind.label(), entry.query);
        let _ = writeln!(
            inquiries,
            "- Resultado: {}",
            entry.response.as_deref().unwrap_or("")
        );
    }
    if inquiries.is_empty() {
        inquiries.push_str("(nenhuma ação de investigação)\n");
    }

    let closing = |kind: ActionType| {
        transcript
            .iter()
            .find(|a| a.kind == kind)
            .map(|a| a.query.trim())
            .filter(|q| !q.is_empty())
            .unwrap_or(NOT_PROVIDED)
    };

    format!(
        "Você é um preceptor de medicina experiente avaliando o atendimento de um \
         médico recém-formado.\n\n\
         **Caso clínico real:**\n{hidden}\n\n\
         **Transcrição do atendimento:**\n{inquiries}\n\
         **Hipóteses diagnósticas do médico:**\n{hypotheses}\n\n\
         **Conduta final do médico:**\n{conduct}\n\n\
         **Tarefa:**\n\
         Avalie a condução do caso com base nas melhores evidências e nas diretrizes \
         brasileiras. Seja crítico, justo e educativo.\n\
         Preencha todos os campos do schema JSON.\n\
         Cada nota vai de 0 (péssimo) a 100 (perfeito).\n\
         Os acertos e as inadequações devem ser listas em markdown.",
        hidden = case.full_case_description,
        hypotheses = closing(ActionType::Hypotheses),
        conduct = closing(ActionType::FinalConduct),
    )
}

/// Prompt for a skill challenge.
#[must_use]
pub fn skill_challenge_prompt(skill: Skill) -> String {
    format!(
        "Você cria desafios rápidos para treinamento médico.\n\
         Crie um desafio para a habilidade: \"{skill}\".\n\
         O desafio deve ser curto e direto.\n\
         - ECG ou radiografia: descreva os achados do exame junto com uma breve vinheta clínica.\n\
         - Manejo de condições: descreva um paciente com a condição e peça a conduta imediata.\n\
         O campo challengeText é o que o médico verá.\n\
         O campo fullDescription traz a resposta correta e a justificativa, para a avaliação.\n\
         Seja conciso. Responda seguindo o schema JSON.",
        skill = skill.label(),
    )
}

/// Prompt for judging a skill answer.
#[must_use]
pub fn skill_evaluation_prompt(challenge: &SkillChallenge, answer: &str) -> String {
    format!(
        "Você é um preceptor médico avaliando uma resposta rápida.\n\n\
         **Desafio e resposta correta:**\n{key}\n\n\
         **Resposta do médico:**\n\"{answer}\"\n\n\
         **Tarefa:**\n\
         Diga se a resposta está correta ou majoritariamente correta e explique em poucas \
         linhas. O objetivo é um feedback imediato.\n\
         Responda seguindo o schema JSON.",
        key = challenge.full_description,
    )
}
