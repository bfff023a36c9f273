//! Text normalization helpers used for keyword matching.

/// Lower-case `s` and strip Portuguese diacritics (`Técnica` -> `tecnica`).
pub fn fold(s: &str) -> String {
    s.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

/// Folded alphanumeric tokens longer than `min_len` characters.
pub fn tokens(s: &str, min_len: usize) -> Vec<String> {
    fold(s)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > min_len)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_strips_accents() {
        assert_eq!(fold("Nota Técnica"), "nota tecnica");
        assert_eq!(fold("CONVÊNIO ICMS"), "convenio icms");
        assert_eq!(fold("Atualização"), "atualizacao");
    }

    #[test]
    fn tokens_filters_short_words() {
        assert_eq!(
            tokens("Tabela de CFOP - Operações", 3),
            vec!["tabela", "cfop", "operacoes"]
        );
    }
}
