use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub sql_type: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub columns: &'static [ColumnInfo],
}

/// Description of the seeded practice tables shown next to the exercise editor.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeSchema {
    pub project_name: &'static str,
    pub project_description: &'static str,
    pub tables: &'static [TableInfo],
    pub knowledge_points: &'static [&'static str],
    pub note: &'static str,
}

const fn column(
    name: &'static str,
    sql_type: &'static str,
    description: &'static str,
) -> ColumnInfo {
    ColumnInfo {
        name,
        sql_type,
        description,
    }
}

pub static SCHEMA: PracticeSchema = PracticeSchema {
    project_name: "Student records and smart farm sensors",
    project_description: "A small course-enrolment database plus a farm sensor log, \
        used for single- and multi-table query practice.",
    tables: &[
        TableInfo {
            name: "practice_student",
            description: "Students",
            columns: &[
                column("Sno", "CHAR(10)", "Student number (primary key)"),
                column("Sname", "CHAR(20)", "Name (unique)"),
                column("Ssex", "CHAR(6)", "Sex"),
                column("Sage", "INT", "Age"),
                column("Sdept", "CHAR(40)", "Department"),
            ],
        },
        TableInfo {
            name: "practice_course",
            description: "Courses",
            columns: &[
                column("Cno", "CHAR(4)", "Course number (primary key)"),
                column("Cname", "CHAR(40)", "Course name"),
                column("Cpno", "CHAR(4)", "Prerequisite course number"),
                column("Ccredit", "SMALLINT", "Credits"),
            ],
        },
        TableInfo {
            name: "practice_sc",
            description: "Enrolments and grades",
            columns: &[
                column("Sno", "CHAR(10)", "Student number"),
                column("Cno", "CHAR(4)", "Course number"),
                column("Grade", "INT", "Grade, NULL when not yet graded"),
            ],
        },
        TableInfo {
            name: "sensor_monitor",
            description: "Sensor readings",
            columns: &[
                column("monitor_id", "INT", "Reading id (primary key, serial)"),
                column("sensor_id", "VARCHAR(20)", "Sensor id, e.g. S202501"),
                column("monitor_type", "VARCHAR(20)", "temperature, humidity or soil moisture"),
                column("monitor_value", "DECIMAL(6,2)", "Reading (degrees C or percent)"),
                column("monitor_time", "TIMESTAMP", "Time of the reading"),
                column("location", "VARCHAR(30)", "Where the sensor is installed"),
                column("status", "VARCHAR(10)", "normal or abnormal; NULL when offline"),
            ],
        },
    ],
    knowledge_points: &[
        "Projection: SELECT col1, col2 FROM table",
        "DISTINCT removes duplicate rows",
        "Comparison operators: =, >, <, >=, <=, <>",
        "Ranges: BETWEEN ... AND ...",
        "Pattern matching: LIKE with % and _",
        "NULL checks: IS NULL, IS NOT NULL",
        "Sorting: ORDER BY col [ASC|DESC]",
        "Aggregates: COUNT, SUM, AVG, MAX, MIN",
        "Grouping: GROUP BY",
    ],
    note: "Only SELECT statements can be run against these tables.",
};
