use std::collections::BTreeMap;

use crate::record::IncomeField;
use crate::rules::{CategoryRule, RangeBin, RuleColumn, RuleKind};

pub fn default_rules() -> BTreeMap<String, CategoryRule> {
    let mut out = BTreeMap::new();
    for rule in [
        map_rule("region", RuleColumn::State, REGION_BY_STATE),
        map_rule("state", RuleColumn::State, STATE_NAMES),
        map_rule("sex", RuleColumn::Sex, SEX_LABELS),
        map_rule("race", RuleColumn::Race, RACE_LABELS),
        map_rule("education", RuleColumn::Education, EDUCATION_LABELS),
        prefix_rule("occupation_group", RuleColumn::Occupation, 1, OCCUPATION_MAJOR_GROUPS),
        age_bins(),
        income_bins(),
    ] {
        out.insert(rule.name.clone(), rule);
    }
    out
}

fn map_rule(name: &str, column: RuleColumn, pairs: &[(&str, &str)]) -> CategoryRule {
    CategoryRule {
        name: name.to_string(),
        column,
        kind: RuleKind::Map {
            table: to_table(pairs),
        },
        fallback: None,
    }
}

fn prefix_rule(name: &str, column: RuleColumn, width: usize, pairs: &[(&str, &str)]) -> CategoryRule {
    CategoryRule {
        name: name.to_string(),
        column,
        kind: RuleKind::Prefix {
            width,
            table: to_table(pairs),
        },
        fallback: None,
    }
}

fn to_table(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn age_bins() -> CategoryRule {
    let bins = [
        (14.0, Some(18.0), "14-17"),
        (18.0, Some(25.0), "18-24"),
        (25.0, Some(40.0), "25-39"),
        (40.0, Some(60.0), "40-59"),
        (60.0, None, "60+"),
    ];
    CategoryRule {
        name: "age_bin".to_string(),
        column: RuleColumn::Age,
        kind: RuleKind::Range {
            bins: bins
                .into_iter()
                .map(|(min, max, label)| RangeBin {
                    min,
                    max,
                    label: label.to_string(),
                })
                .collect(),
        },
        fallback: Some("fora da faixa".to_string()),
    }
}

fn income_bins() -> CategoryRule {
    let bins = [
        (0.0, Some(1412.0), "até 1 SM"),
        (1412.0, Some(2824.0), "1 a 2 SM"),
        (2824.0, Some(7060.0), "2 a 5 SM"),
        (7060.0, Some(14120.0), "5 a 10 SM"),
        (14120.0, None, "acima de 10 SM"),
    ];
    CategoryRule {
        name: "income_bin".to_string(),
        column: RuleColumn::Income(IncomeField::HabitualTotal),
        kind: RuleKind::Range {
            bins: bins
                .into_iter()
                .map(|(min, max, label)| RangeBin {
                    min,
                    max,
                    label: label.to_string(),
                })
                .collect(),
        },
        fallback: None,
    }
}

const REGION_BY_STATE: &[(&str, &str)] = &[
    ("11", "Norte"),
    ("12", "Norte"),
    ("13", "Norte"),
    ("14", "Norte"),
    ("15", "Norte"),
    ("16", "Norte"),
    ("17", "Norte"),
    ("21", "Nordeste"),
    ("22", "Nordeste"),
    ("23", "Nordeste"),
    ("24", "Nordeste"),
    ("25", "Nordeste"),
    ("26", "Nordeste"),
    ("27", "Nordeste"),
    ("28", "Nordeste"),
    ("29", "Nordeste"),
    ("31", "Sudeste"),
    ("32", "Sudeste"),
    ("33", "Sudeste"),
    ("35", "Sudeste"),
    ("41", "Sul"),
    ("42", "Sul"),
    ("43", "Sul"),
    ("50", "Centro-Oeste"),
    ("51", "Centro-Oeste"),
    ("52", "Centro-Oeste"),
    ("53", "Centro-Oeste"),
];

const STATE_NAMES: &[(&str, &str)] = &[
    ("11", "Rondônia"),
    ("12", "Acre"),
    ("13", "Amazonas"),
    ("14", "Roraima"),
    ("15", "Pará"),
    ("16", "Amapá"),
    ("17", "Tocantins"),
    ("21", "Maranhão"),
    ("22", "Piauí"),
    ("23", "Ceará"),
    ("24", "Rio Grande do Norte"),
    ("25", "Paraíba"),
    ("26", "Pernambuco"),
    ("27", "Alagoas"),
    ("28", "Sergipe"),
    ("29", "Bahia"),
    ("31", "Minas Gerais"),
    ("32", "Espírito Santo"),
    ("33", "Rio de Janeiro"),
    ("35", "São Paulo"),
    ("41", "Paraná"),
    ("42", "Santa Catarina"),
    ("43", "Rio Grande do Sul"),
    ("50", "Mato Grosso do Sul"),
    ("51", "Mato Grosso"),
    ("52", "Goiás"),
    ("53", "Distrito Federal"),
];

const SEX_LABELS: &[(&str, &str)] = &[("1", "Homem"), ("2", "Mulher")];

const RACE_LABELS: &[(&str, &str)] = &[
    ("1", "Branca"),
    ("2", "Preta"),
    ("3", "Amarela"),
    ("4", "Parda"),
    ("5", "Indígena"),
    ("9", "Ignorado"),
];

const EDUCATION_LABELS: &[(&str, &str)] = &[
    ("01", "Creche"),
    ("02", "Pré-escola"),
    ("03", "Classe de alfabetização"),
    ("04", "Alfabetização de jovens e adultos"),
    ("05", "Elementar"),
    ("06", "Médio 1º ciclo"),
    ("07", "Regular do 1º grau"),
    ("08", "Supletivo do 1º grau"),
    ("09", "Médio 2º ciclo"),
    ("10", "Regular do 2º grau"),
    ("11", "Supletivo do 2º grau"),
    ("12", "Superior"),
    ("13", "Nível superior"),
    ("14", "Mestrado"),
    ("15", "Doutorado"),
];

const OCCUPATION_MAJOR_GROUPS: &[(&str, &str)] = &[
    ("0", "Membros das forças armadas, policiais e bombeiros militares"),
    ("1", "Diretores e gerentes"),
    ("2", "Profissionais das ciências e intelectuais"),
    ("3", "Técnicos e profissionais de nível médio"),
    ("4", "Trabalhadores de apoio administrativo"),
    ("5", "Trabalhadores dos serviços, vendedores dos comércios e mercados"),
    ("6", "Trabalhadores qualificados da agropecuária, florestais, da caça e da pesca"),
    ("7", "Trabalhadores qualificados, operários e artesãos da construção e das artes mecânicas"),
    ("8", "Operadores de instalações e máquinas e montadores"),
    ("9", "Ocupações elementares"),
];
