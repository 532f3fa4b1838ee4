//! Treatment advice shown next to a prediction

/// Fixed advice for the disease classes the sorter knows about
const ADVICE: &[(&str, &str)] = &[
    (
        "apple_cedar_apple_rust",
        "Remove nearby junipers or galls where possible and apply a protective fungicide from pink bud through early fruit set.",
    ),
    (
        "apple_apple_scab",
        "Rake and destroy fallen leaves, prune for airflow, and spray fungicide during wet spring weather.",
    ),
    (
        "cherry_powdery_mildew",
        "Prune to open the canopy, avoid excess nitrogen, and treat with sulfur or a labelled fungicide.",
    ),
    (
        "corn_common_rust",
        "Plant resistant hybrids; fungicide is rarely needed unless rust appears early on susceptible varieties.",
    ),
    (
        "grape_black_rot",
        "Remove mummified berries and infected canes, and spray fungicide from bud break until berries colour.",
    ),
    (
        "grape_esca",
        "Prune out infected wood in dry weather, protect pruning wounds, and remove badly affected vines.",
    ),
    (
        "peach_bacterial_spot",
        "Grow tolerant varieties, avoid overhead watering, and apply copper sprays at leaf fall and bud swell.",
    ),
    (
        "pepper_bacterial_spot",
        "Use disease-free seed, rotate crops, avoid working wet plants, and apply copper-based bactericide.",
    ),
    (
        "potato_early_blight",
        "Remove infected foliage, rotate away from potatoes and tomatoes, and apply a protective fungicide.",
    ),
    (
        "rice_leaf_bacterial_blight",
        "Use resistant varieties, balance nitrogen, and drain fields to reduce spread between plants.",
    ),
    (
        "rice_leaf_brown_spot",
        "Correct soil nutrient deficiencies, use treated seed, and apply fungicide when spots spread.",
    ),
    (
        "rice_leaf_smut",
        "Remove crop residue after harvest and avoid heavy nitrogen; fungicide at booting if the disease is common.",
    ),
    (
        "strawberry_leaf_scorch",
        "Remove old infected leaves after harvest, keep beds weeded, and renew plantings every few years.",
    ),
    (
        "tomato_early_blight",
        "Remove lower infected leaves, mulch to stop soil splash, water at the base, and apply fungicide.",
    ),
];

const HEALTHY_ADVICE: &str =
    "The leaf looks healthy. Keep up regular watering, feeding and monitoring.";

const UNKNOWN_ADVICE: &str =
    "No specific advice for this class. Isolate affected plants and consult a local agricultural extension service.";

/// Advice for a predicted class label
pub fn advice_for(label: &str) -> &'static str {
    if let Some((_, advice)) = ADVICE.iter().find(|(name, _)| *name == label) {
        return advice;
    }
    if label.to_lowercase().contains("healthy") {
        HEALTHY_ADVICE
    } else {
        UNKNOWN_ADVICE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_disease() {
        assert!(advice_for("tomato_early_blight").contains("fungicide"));
    }

    #[test]
    fn test_fallbacks() {
        assert_eq!(advice_for("corn_healthy"), HEALTHY_ADVICE);
        assert_eq!(advice_for("Grape___Healthy"), HEALTHY_ADVICE);
        assert_eq!(advice_for("banana_wilt"), UNKNOWN_ADVICE);
    }
}
